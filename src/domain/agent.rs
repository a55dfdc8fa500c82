//! Agent-related domain types.
//!
//! An agent context is the in-memory view of one connected agent; it is
//! created on first authentication or WebSocket registration and mutated
//! only by the firewall orchestrator.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Blocked,
    Quarantined,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Quarantined => write!(f, "quarantined"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "blocked" => Ok(AgentStatus::Blocked),
            "quarantined" => Ok(AgentStatus::Quarantined),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

/// Capability granted to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Execute => write!(f, "execute"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "execute" => Ok(Permission::Execute),
            "admin" => Ok(Permission::Admin),
            _ => Err(format!("Unknown permission: {}", s)),
        }
    }
}

/// In-memory state for one agent, keyed by its wire identifier.
///
/// Owned exclusively by the firewall orchestrator; detectors receive it by
/// reference for read only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Display name for the agent.
    pub name: String,

    /// Current lifecycle status.
    pub status: AgentStatus,

    /// Capabilities granted to this agent.
    pub permissions: HashSet<Permission>,

    /// Hosts this agent may upload to without exfiltration inspection.
    pub trusted_domains: Vec<String>,

    /// Per-minute request cap.
    pub max_requests_per_minute: u32,

    /// Lifetime request counter.
    pub request_count: u64,

    /// Wall time of the last inspected request.
    pub last_seen: DateTime<Utc>,

    /// Accumulated composite threat score.
    pub threat_score: f64,

    /// Ring of recent message fingerprints (mirror of the KV window).
    pub recent_messages: Vec<String>,

    /// Peer IP for a live WebSocket connection, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// When the current connection was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,

    /// When this context was first created.
    pub created_at: DateTime<Utc>,
}

impl AgentContext {
    /// Create a fresh context with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: AgentStatus::Active,
            permissions: HashSet::new(),
            trusted_domains: Vec::new(),
            max_requests_per_minute: 100,
            request_count: 0,
            last_seen: now,
            threat_score: 0.0,
            recent_messages: Vec::new(),
            ip: None,
            connected_at: None,
            created_at: now,
        }
    }

    /// Set the trusted-domain list.
    pub fn with_trusted_domains(mut self, domains: Vec<String>) -> Self {
        self.trusted_domains = domains;
        self
    }

    /// Set the per-minute request cap.
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.max_requests_per_minute = per_minute;
        self
    }

    /// Set the peer address for a live connection.
    pub fn with_peer(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self.connected_at = Some(Utc::now());
        self
    }

    /// Merge a re-registration into this context.
    ///
    /// Counters and history survive: `request_count`, `created_at`,
    /// `threat_score`, `recent_messages` are preserved, and
    /// `trusted_domains` is preserved when the incoming context carries
    /// none. Repeating an identical registration is a no-op.
    pub fn merge_registration(&mut self, incoming: AgentContext) {
        self.name = incoming.name;
        self.status = incoming.status;
        self.permissions = incoming.permissions;
        self.max_requests_per_minute = incoming.max_requests_per_minute;
        if !incoming.trusted_domains.is_empty() {
            self.trusted_domains = incoming.trusted_domains;
        }
        if incoming.ip.is_some() {
            self.ip = incoming.ip;
            self.connected_at = incoming.connected_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        let status = AgentStatus::Quarantined;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"quarantined\"");

        let parsed: AgentStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
        assert_eq!("quarantined".parse::<AgentStatus>().unwrap(), status);
    }

    #[test]
    fn test_merge_preserves_counters() {
        let mut ctx = AgentContext::new("scout")
            .with_trusted_domains(vec!["example.com".to_string()]);
        ctx.request_count = 42;
        ctx.threat_score = 0.3;
        ctx.recent_messages.push("abcd".to_string());
        let created = ctx.created_at;

        ctx.merge_registration(AgentContext::new("scout").with_rate_limit(20));

        assert_eq!(ctx.request_count, 42);
        assert_eq!(ctx.threat_score, 0.3);
        assert_eq!(ctx.recent_messages.len(), 1);
        assert_eq!(ctx.created_at, created);
        assert_eq!(ctx.max_requests_per_minute, 20);
        // Omitted trusted domains survive the merge
        assert_eq!(ctx.trusted_domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut ctx = AgentContext::new("scout");
        ctx.request_count = 7;

        let before = ctx.clone();
        let incoming = AgentContext::new("scout");
        ctx.merge_registration(incoming.clone());
        let first = ctx.clone();
        ctx.merge_registration(incoming);

        assert_eq!(first.request_count, before.request_count);
        assert_eq!(ctx.request_count, first.request_count);
        assert_eq!(ctx.trusted_domains, first.trusted_domains);
    }
}
