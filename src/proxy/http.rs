//! Inline HTTP proxy surface.
//!
//! Every request that is not addressed to the management API falls through
//! here: the firewall inspects it, denied requests get a stable 403
//! envelope, and approved requests are forwarded to the upstream host with
//! hop-by-hop headers stripped and gateway headers injected. Upstream
//! responses pass through the response scrubber before being returned.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::ThreatLevel;
use crate::engine::RequestMeta;
use crate::AppState;

/// Inbound body cap, in bytes.
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Headers that must not cross the proxy boundary.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Stable deny envelope returned to the caller.
#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub error: String,
    pub reason: String,
    #[serde(rename = "threatLevel")]
    pub threat_level: ThreatLevel,
}

/// Read the agent identifier from the wire: `x-agent-id` first,
/// `x-clawshield-agent-id` second.
pub fn agent_id_from_headers(headers: &HeaderMap) -> Option<String> {
    for name in ["x-agent-id", "x-clawshield-agent-id"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Client IP, honoring `x-forwarded-for` when the gateway is itself behind
/// a proxy.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// The inline proxy handler: inspect, then forward.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let path = request.uri().path().to_string();

    let headers = request.headers().clone();
    let header_view = header_map(&headers);
    let agent_id = agent_id_from_headers(&headers);
    let ip = client_ip(&headers, peer);

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({"error": "Request body exceeds 1 MiB"})),
            )
                .into_response();
        }
    };
    let body_text = if body_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&body_bytes).into_owned())
    };

    let result = state
        .orchestrator
        .inspect_request(RequestMeta {
            agent_id: agent_id.as_deref(),
            method: method.as_str(),
            path: &path,
            body: body_text.as_deref(),
            headers: Some(&header_view),
            ip: Some(&ip),
        })
        .await;

    if !result.allowed {
        let envelope = BlockedResponse {
            error: "Request blocked by firewall".to_string(),
            reason: result
                .reason
                .unwrap_or_else(|| "Blocked".to_string()),
            threat_level: result.threat_level.unwrap_or(ThreatLevel::Unknown),
        };
        return (StatusCode::FORBIDDEN, Json(envelope)).into_response();
    }

    forward(&state, method, &path_and_query, &headers, body_bytes, result.threat_score).await
}

async fn forward(
    state: &AppState,
    method: axum::http::Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: axum::body::Bytes,
    threat_score: Option<f64>,
) -> Response {
    let url = format!(
        "{}{}",
        state.upstream.http_url.trim_end_matches('/'),
        path_and_query
    );

    let method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return (StatusCode::METHOD_NOT_ALLOWED, "Unsupported method").into_response();
        }
    };

    let request_id = Uuid::new_v4().to_string();
    let mut builder = state.http_client.request(method, &url);

    for (name, value) in headers {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || lower == "host" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value);
        }
    }
    builder = builder.header("x-clawshield-request-id", &request_id);
    builder = builder.header("x-clawshield-inspected", "true");
    if let Some(score) = threat_score {
        builder = builder.header("x-clawshield-threat-score", format!("{:.3}", score));
    }

    let upstream_response = match builder.body(body.to_vec()).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, url = %url, request_id = %request_id, "Upstream request failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "Upstream request failed"})),
            )
                .into_response();
        }
    };

    let status = upstream_response.status();
    let response_headers = upstream_response.headers().clone();
    let response_body = upstream_response.bytes().await.unwrap_or_default();

    // Post-proxy hygiene scan; findings are logged, not blocked.
    let scrub_headers: HashMap<String, String> = response_headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();
    let body_preview = std::str::from_utf8(&response_body).ok();
    let findings = state
        .scrubber
        .scan(status.as_u16(), &scrub_headers, body_preview);
    for finding in &findings {
        tracing::warn!(
            request_id = %request_id,
            issue = %finding.kind,
            detail = %finding.detail,
            "Response scrubber finding"
        );
    }

    let mut response = Response::builder().status(status.as_u16());
    for (name, value) in &response_headers {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        response = response.header(name.as_str(), value.as_bytes());
    }
    response = response.header("x-clawshield-request-id", &request_id);

    response
        .body(Body::from(response_body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
