//! Skill analysis domain types.
//!
//! A "skill" is a fragment of agent-supplied source code analyzed before it
//! may run downstream. The analyzer produces a bounded risk score and an
//! enumerated reason; callers cache verdicts by content hash.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::ThreatLevel;

/// Severity of one reported vulnerability. Ordered: info < low < medium <
/// high < critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one vulnerability of this severity to the fused
    /// risk score.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Severity::Critical => 0.5,
            Severity::High => 0.3,
            Severity::Medium => 0.15,
            Severity::Low => 0.05,
            Severity::Info => 0.0,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Category of a detected vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityKind {
    DangerousFunction,
    DangerousModule,
    FilesystemAccess,
    NetworkRequest,
    SandboxEscape,
    DynamicImport,
    EnvAccess,
    Obfuscation,
    ParseError,
}

impl std::fmt::Display for VulnerabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnerabilityKind::DangerousFunction => write!(f, "dangerous_function"),
            VulnerabilityKind::DangerousModule => write!(f, "dangerous_module"),
            VulnerabilityKind::FilesystemAccess => write!(f, "filesystem_access"),
            VulnerabilityKind::NetworkRequest => write!(f, "network_request"),
            VulnerabilityKind::SandboxEscape => write!(f, "sandbox_escape"),
            VulnerabilityKind::DynamicImport => write!(f, "dynamic_import"),
            VulnerabilityKind::EnvAccess => write!(f, "env_access"),
            VulnerabilityKind::Obfuscation => write!(f, "obfuscation"),
            VulnerabilityKind::ParseError => write!(f, "parse_error"),
        }
    }
}

/// One finding from the static analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Final verdict for one candidate skill.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SkillAnalysis {
    /// Whether the skill may run.
    pub safe: bool,

    /// Fused risk score in [0, 1].
    pub risk_score: f64,

    /// Enumerated reason, set for every unsafe verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Static findings.
    pub vulnerabilities: Vec<Vulnerability>,

    /// Pattern labels observed across the stages.
    pub patterns: Vec<String>,

    /// Behaviors observed during dynamic execution.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub behaviors: Vec<String>,

    /// Name of the malware signature that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Wall-clock analysis duration.
    pub analysis_time_ms: f64,
}

impl SkillAnalysis {
    /// A clean verdict with no findings.
    pub fn clean(analysis_time_ms: f64) -> Self {
        Self {
            safe: true,
            risk_score: 0.0,
            reason: None,
            vulnerabilities: Vec::new(),
            patterns: Vec::new(),
            behaviors: Vec::new(),
            signature: None,
            analysis_time_ms,
        }
    }
}

/// A known-malware signature: matches by exact content hash or by regex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalwareSignature {
    pub id: Uuid,
    pub name: String,
    /// Lowercase SHA-256 hex of known-bad content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Regex over the candidate source. Invalid patterns are skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub severity: ThreatLevel,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_risk_weights() {
        assert_eq!(Severity::Critical.risk_weight(), 0.5);
        assert_eq!(Severity::High.risk_weight(), 0.3);
        assert_eq!(Severity::Medium.risk_weight(), 0.15);
        assert_eq!(Severity::Low.risk_weight(), 0.05);
        assert_eq!(Severity::Info.risk_weight(), 0.0);
    }

    #[test]
    fn test_vulnerability_serializes_with_type_key() {
        let vuln = Vulnerability {
            kind: VulnerabilityKind::DangerousFunction,
            severity: Severity::Critical,
            message: "Use of eval".to_string(),
            line: Some(3),
            column: Some(10),
        };
        let json = serde_json::to_value(&vuln).unwrap();
        assert_eq!(json["type"], "dangerous_function");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["line"], 3);
    }
}
