//! HTTP request handlers for the management API.

use std::time::Duration;

use axum::extract::State;
use axum::Json;

use crate::analyzer::SkillAnalyzer;
use crate::api::types::*;
use crate::error::{GatewayError, GatewayResult};
use crate::AppState;

/// Largest skill body accepted for analysis, in bytes.
const MAX_SKILL_BYTES: usize = 262_144;

/// Analyze a skill, serving cached verdicts by content hash.
///
/// POST /v1/skills/analyze
#[utoipa::path(
    post,
    path = "/v1/skills/analyze",
    request_body = AnalyzeSkillRequest,
    responses(
        (status = 200, description = "Analysis complete", body = AnalyzeSkillResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Internal error")
    ),
    tag = "skills"
)]
pub async fn analyze_skill(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeSkillRequest>,
) -> GatewayResult<Json<AnalyzeSkillResponse>> {
    if request.code.is_empty() {
        return Err(GatewayError::BadRequest("Code must not be empty".to_string()));
    }
    if request.code.len() > MAX_SKILL_BYTES {
        return Err(GatewayError::BadRequest(format!(
            "Code exceeds {} bytes",
            MAX_SKILL_BYTES
        )));
    }

    let language = request
        .language
        .unwrap_or_else(|| "javascript".to_string());
    let code_hash = SkillAnalyzer::code_hash(&request.code);

    if let Some(verdict) = state.repository.get_skill_verdict(&code_hash).await? {
        tracing::debug!(code_hash = %code_hash, "Serving cached skill verdict");
        return Ok(Json(AnalyzeSkillResponse {
            code_hash,
            cached: true,
            analysis: verdict.analysis,
        }));
    }

    let timeout = request.timeout_ms.map(Duration::from_millis);
    let analysis = state.analyzer.analyze(&request.code, timeout).await;

    tracing::info!(
        code_hash = %code_hash,
        safe = analysis.safe,
        risk_score = analysis.risk_score,
        reason = ?analysis.reason,
        "Skill analyzed"
    );

    // Cache-write failures do not fail the analysis.
    if let Err(e) = state
        .repository
        .upsert_skill_verdict(&code_hash, &language, &analysis)
        .await
    {
        tracing::error!(error = %e, code_hash = %code_hash, "Failed to cache skill verdict");
    }

    Ok(Json(AnalyzeSkillResponse {
        code_hash,
        cached: false,
        analysis,
    }))
}

/// Health check endpoint.
///
/// GET /v1/health
#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
