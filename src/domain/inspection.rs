//! Inspection verdicts and threat records.
//!
//! Every firewall decision is a value, never an exception: denies carry a
//! reason and a threat level, and critical denies also fan out to the alert
//! handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Threat level attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
    /// Internal failure; the pipeline could not finish.
    Unknown,
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::Low => write!(f, "low"),
            ThreatLevel::Medium => write!(f, "medium"),
            ThreatLevel::High => write!(f, "high"),
            ThreatLevel::Critical => write!(f, "critical"),
            ThreatLevel::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ThreatLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(ThreatLevel::Low),
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            "unknown" => Ok(ThreatLevel::Unknown),
            _ => Err(format!("Unknown threat level: {}", s)),
        }
    }
}

/// Category of a recorded threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    RateLimitExceeded,
    Blacklisted,
    RuleViolation,
    HighThreatScore,
    PromptInjection,
    DataExfiltration,
    UnauthorizedAgentCommunication,
    InfiniteLoop,
    MalwareDetected,
    CredentialLeak,
    WebsocketAbuse,
}

impl ThreatType {
    /// Fixed severity mapping for threat records and alert fan-out.
    pub fn severity(&self) -> ThreatLevel {
        match self {
            ThreatType::RateLimitExceeded => ThreatLevel::Low,
            ThreatType::Blacklisted => ThreatLevel::Critical,
            ThreatType::RuleViolation => ThreatLevel::Medium,
            ThreatType::HighThreatScore => ThreatLevel::High,
            ThreatType::PromptInjection => ThreatLevel::Critical,
            ThreatType::DataExfiltration => ThreatLevel::Critical,
            ThreatType::UnauthorizedAgentCommunication => ThreatLevel::High,
            ThreatType::InfiniteLoop => ThreatLevel::Medium,
            ThreatType::MalwareDetected => ThreatLevel::Critical,
            ThreatType::CredentialLeak => ThreatLevel::Critical,
            ThreatType::WebsocketAbuse => ThreatLevel::Medium,
        }
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatType::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            ThreatType::Blacklisted => write!(f, "blacklisted"),
            ThreatType::RuleViolation => write!(f, "rule_violation"),
            ThreatType::HighThreatScore => write!(f, "high_threat_score"),
            ThreatType::PromptInjection => write!(f, "prompt_injection"),
            ThreatType::DataExfiltration => write!(f, "data_exfiltration"),
            ThreatType::UnauthorizedAgentCommunication => {
                write!(f, "unauthorized_agent_communication")
            }
            ThreatType::InfiniteLoop => write!(f, "infinite_loop"),
            ThreatType::MalwareDetected => write!(f, "malware_detected"),
            ThreatType::CredentialLeak => write!(f, "credential_leak"),
            ThreatType::WebsocketAbuse => write!(f, "websocket_abuse"),
        }
    }
}

impl std::str::FromStr for ThreatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate_limit_exceeded" => Ok(ThreatType::RateLimitExceeded),
            "blacklisted" => Ok(ThreatType::Blacklisted),
            "rule_violation" => Ok(ThreatType::RuleViolation),
            "high_threat_score" => Ok(ThreatType::HighThreatScore),
            "prompt_injection" => Ok(ThreatType::PromptInjection),
            "data_exfiltration" => Ok(ThreatType::DataExfiltration),
            "unauthorized_agent_communication" => Ok(ThreatType::UnauthorizedAgentCommunication),
            "infinite_loop" => Ok(ThreatType::InfiniteLoop),
            "malware_detected" => Ok(ThreatType::MalwareDetected),
            "credential_leak" => Ok(ThreatType::CredentialLeak),
            "websocket_abuse" => Ok(ThreatType::WebsocketAbuse),
            _ => Err(format!("Unknown threat type: {}", s)),
        }
    }
}

/// Outcome of inspecting one request or one message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InspectionResult {
    /// Whether the traffic may proceed.
    pub allowed: bool,

    /// Why it was denied. Always present when `allowed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Threat level attached to a deny.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_level: Option<ThreatLevel>,

    /// Composite threat score, when the scorer ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_score: Option<f64>,
}

impl InspectionResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            threat_level: None,
            threat_score: None,
        }
    }

    pub fn allow_scored(score: f64) -> Self {
        Self {
            allowed: true,
            reason: None,
            threat_level: None,
            threat_score: Some(score),
        }
    }

    pub fn deny(reason: impl Into<String>, level: ThreatLevel) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            threat_level: Some(level),
            threat_score: None,
        }
    }

    /// The fail-closed verdict for internal pipeline failures.
    pub fn inspection_error() -> Self {
        Self::deny("Inspection error", ThreatLevel::Unknown)
    }
}

/// A persisted threat record (append-only).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreatEvent {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub threat_type: ThreatType,
    pub severity: ThreatLevel,
    pub details: serde_json::Value,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreatEvent {
    /// Create a new unresolved event with the fixed severity for its type.
    pub fn new(agent_id: Option<String>, threat_type: ThreatType, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            threat_type,
            severity: threat_type.severity(),
            details,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_always_has_reason() {
        let result = InspectionResult::deny("Rate limit exceeded", ThreatLevel::Medium);
        assert!(!result.allowed);
        assert!(result.reason.is_some());

        let result = InspectionResult::inspection_error();
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("Inspection error"));
        assert_eq!(result.threat_level, Some(ThreatLevel::Unknown));
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ThreatType::RuleViolation.severity(), ThreatLevel::Medium);
        assert_eq!(ThreatType::HighThreatScore.severity(), ThreatLevel::High);
        assert_eq!(ThreatType::PromptInjection.severity(), ThreatLevel::Critical);
        assert_eq!(ThreatType::DataExfiltration.severity(), ThreatLevel::Critical);
        assert_eq!(
            ThreatType::UnauthorizedAgentCommunication.severity(),
            ThreatLevel::High
        );
        assert_eq!(ThreatType::InfiniteLoop.severity(), ThreatLevel::Medium);
        assert_eq!(ThreatType::RateLimitExceeded.severity(), ThreatLevel::Low);
        assert_eq!(ThreatType::MalwareDetected.severity(), ThreatLevel::Critical);
        assert_eq!(ThreatType::CredentialLeak.severity(), ThreatLevel::Critical);
        assert_eq!(ThreatType::WebsocketAbuse.severity(), ThreatLevel::Medium);
    }

    #[test]
    fn test_threat_type_roundtrip() {
        let t: ThreatType = "unauthorized_agent_communication".parse().unwrap();
        assert_eq!(t, ThreatType::UnauthorizedAgentCommunication);
        assert_eq!(t.to_string(), "unauthorized_agent_communication");
    }
}
