//! Route definitions for the gateway.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;
use crate::proxy;
use crate::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::analyze_skill,
        handlers::health_check,
    ),
    components(schemas(
        crate::api::types::AnalyzeSkillRequest,
        crate::api::types::AnalyzeSkillResponse,
        crate::api::types::HealthResponse,
        crate::domain::SkillAnalysis,
        crate::domain::Vulnerability,
        crate::domain::VulnerabilityKind,
        crate::domain::Severity,
        crate::domain::InspectionResult,
        crate::domain::ThreatLevel,
        crate::domain::ThreatType,
    )),
    tags(
        (name = "skills", description = "Skill analysis endpoints"),
        (name = "health", description = "Health and status endpoints")
    ),
    info(
        title = "ClawShield API",
        version = "0.1.0",
        description = "Inline security gateway for autonomous AI agents",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Build the gateway router: management API, WebSocket surface, and the
/// inline proxy fallback for everything else.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Skill analysis
        .route("/v1/skills/analyze", post(handlers::analyze_skill))
        // Health
        .route("/v1/health", get(handlers::health_check))
        // WebSocket termination
        .route("/ws", get(proxy::ws_handler))
        // OpenAPI docs
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Everything else goes through the inline proxy
        .fallback(proxy::proxy_handler)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
