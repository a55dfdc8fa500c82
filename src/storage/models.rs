//! Database models for ClawShield.
//!
//! These are the row types returned by SQLx queries.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{FirewallRule, RuleAction, RuleCondition, RuleKind, ThreatEvent};
use crate::error::GatewayError;

/// Database row for the agents table.
#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub id: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub api_key_hash: Option<String>,
    pub permissions: String,
    pub status: String,
    pub max_requests_per_minute: i64,
    pub trusted_domains: String,
    pub metadata: Option<String>,
}

/// Database row for the agent_communication_rules table.
#[derive(Debug, Clone, FromRow)]
pub struct CommunicationRuleRow {
    pub id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub enabled: i64,
    pub max_messages_per_minute: Option<i64>,
}

/// Database row for the firewall_rules table.
#[derive(Debug, Clone, FromRow)]
pub struct FirewallRuleRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub rule_type: String,
    pub priority: i64,
    pub enabled: i64,
    pub conditions: String,
    pub action: String,
}

impl TryFrom<FirewallRuleRow> for FirewallRule {
    type Error = GatewayError;

    fn try_from(row: FirewallRuleRow) -> Result<Self, Self::Error> {
        let conditions: Vec<RuleCondition> = serde_json::from_str(&row.conditions)?;
        let action: RuleAction = serde_json::from_str(&row.action)?;

        Ok(FirewallRule {
            id: Uuid::parse_str(&row.id).map_err(|e| GatewayError::Internal(e.to_string()))?,
            name: row.name,
            description: row.description.unwrap_or_default(),
            kind: row
                .rule_type
                .parse::<RuleKind>()
                .map_err(GatewayError::Internal)?,
            priority: row.priority,
            enabled: row.enabled != 0,
            conditions,
            action,
        })
    }
}

/// Database row for the threats table.
#[derive(Debug, Clone, FromRow)]
pub struct ThreatRow {
    pub id: String,
    pub agent_id: Option<String>,
    pub threat_type: String,
    pub severity: String,
    pub details: String,
    pub resolved: i64,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: String,
}

impl TryFrom<ThreatRow> for ThreatEvent {
    type Error = GatewayError;

    fn try_from(row: ThreatRow) -> Result<Self, Self::Error> {
        Ok(ThreatEvent {
            id: Uuid::parse_str(&row.id).map_err(|e| GatewayError::Internal(e.to_string()))?,
            agent_id: row.agent_id,
            threat_type: row
                .threat_type
                .parse()
                .map_err(GatewayError::Internal)?,
            severity: row.severity.parse().map_err(GatewayError::Internal)?,
            details: serde_json::from_str(&row.details)?,
            resolved: row.resolved != 0,
            resolved_at: row
                .resolved_at
                .map(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| GatewayError::Internal(e.to_string()))
                })
                .transpose()?,
            resolved_by: row.resolved_by,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|e| GatewayError::Internal(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

/// Database row for the analyzed_skills table.
#[derive(Debug, Clone, FromRow)]
pub struct AnalyzedSkillRow {
    pub code_hash: String,
    pub language: String,
    pub safe: i64,
    pub risk_score: f64,
    pub reason: Option<String>,
    pub vulnerabilities: String,
    pub patterns: String,
    pub analysis_time_ms: f64,
}
