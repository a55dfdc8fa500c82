//! Request/response types for the management API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::SkillAnalysis;

/// Request body for skill analysis.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeSkillRequest {
    /// Candidate source code.
    pub code: String,
    /// Source language. Only `javascript` is analyzed today.
    #[serde(default)]
    pub language: Option<String>,
    /// Wall-clock budget for the dynamic stage, in milliseconds
    /// (clamped to 1000..=30000).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Response body for skill analysis.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeSkillResponse {
    /// SHA-256 of the code; stable cache key for this verdict.
    pub code_hash: String,
    /// Whether this verdict came from the cache.
    pub cached: bool,
    pub analysis: SkillAnalysis,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
