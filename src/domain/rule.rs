//! Firewall rule types.
//!
//! Rules are persisted rows loaded into an ordered cache by the rule
//! engine. A rule matches when every condition matches (logical AND);
//! evaluation walks rules in ascending priority until an allow or deny
//! matches terminally.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a matching rule terminates (or flags) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Allow,
    Deny,
    /// A flag, not a decision: logged and evaluation continues.
    Conditional,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::Allow => write!(f, "allow"),
            RuleKind::Deny => write!(f, "deny"),
            RuleKind::Conditional => write!(f, "conditional"),
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(RuleKind::Allow),
            "deny" => Ok(RuleKind::Deny),
            "conditional" => Ok(RuleKind::Conditional),
            _ => Err(format!("Unknown rule kind: {}", s)),
        }
    }
}

/// Comparison applied by a condition. A small closed set; never extensible
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Contains,
    Regex,
    Gt,
    Lt,
    In,
}

/// One condition of a rule: a dotted field path, an operator, and an
/// operand (string, number, or string list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

/// What to do when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Allow,
    Deny,
    Log,
    Alert,
    Quarantine,
}

/// Action payload attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Duration in seconds, for quarantine-style actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// A persisted firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: RuleKind,
    /// Lower numeric priority evaluates earlier.
    pub priority: i64,
    pub enabled: bool,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
}

impl FirewallRule {
    /// Denial message for this rule: the action message when present, else
    /// a default naming the rule.
    pub fn deny_message(&self) -> String {
        self.action
            .message
            .clone()
            .unwrap_or_else(|| format!("Blocked by rule: {}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rule(kind: RuleKind, message: Option<&str>) -> FirewallRule {
        FirewallRule {
            id: Uuid::new_v4(),
            name: "no-admin-paths".to_string(),
            description: "Blocks admin paths".to_string(),
            kind,
            priority: 10,
            enabled: true,
            conditions: vec![RuleCondition {
                field: "path".to_string(),
                operator: ConditionOperator::Contains,
                value: serde_json::json!("/admin"),
            }],
            action: RuleAction {
                kind: ActionKind::Deny,
                message: message.map(|m| m.to_string()),
                duration: None,
            },
        }
    }

    #[test]
    fn test_default_deny_message_names_rule() {
        let rule = make_rule(RuleKind::Deny, None);
        assert_eq!(rule.deny_message(), "Blocked by rule: no-admin-paths");
    }

    #[test]
    fn test_explicit_deny_message_wins() {
        let rule = make_rule(RuleKind::Deny, Some("Admin surface is off limits"));
        assert_eq!(rule.deny_message(), "Admin surface is off limits");
    }

    #[test]
    fn test_rule_json_roundtrip() {
        let rule = make_rule(RuleKind::Conditional, None);
        let json = serde_json::to_string(&rule).unwrap();
        let parsed: FirewallRule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, RuleKind::Conditional);
        assert_eq!(parsed.conditions.len(), 1);
        assert_eq!(parsed.conditions[0].operator, ConditionOperator::Contains);
    }
}
