//! Rule Engine - evaluates persisted firewall rules against a request
//! context.
//!
//! Rules are loaded from the store into a snapshot cache with a short TTL.
//! Evaluation walks the snapshot in ascending priority; the first matching
//! allow or deny terminates. Conditional rules are flags: they are logged
//! and evaluation continues.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use regex::RegexBuilder;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{ConditionOperator, FirewallRule, RuleCondition, RuleKind};
use crate::error::GatewayResult;
use crate::storage::GatewayRepository;

/// Terminal outcome of rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    /// No deny matched. Carries the allow rule name when one matched
    /// terminally.
    Allow { rule: Option<String> },
    /// A deny rule matched.
    Deny { rule: String, reason: String },
}

impl RuleVerdict {
    pub fn is_deny(&self) -> bool {
        matches!(self, RuleVerdict::Deny { .. })
    }
}

struct Snapshot {
    rules: Arc<Vec<FirewallRule>>,
    loaded_at: Instant,
}

/// Loads, caches, and evaluates the ordered rule list.
pub struct RuleEngine {
    repo: GatewayRepository,
    cache_ttl: Duration,
    cache: RwLock<Option<Snapshot>>,
    /// Rules whose invalid regex has already been logged.
    regex_warned: Mutex<HashSet<Uuid>>,
}

impl RuleEngine {
    pub fn new(repo: GatewayRepository, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache_ttl,
            cache: RwLock::new(None),
            regex_warned: Mutex::new(HashSet::new()),
        }
    }

    /// Evaluate the current rule set against a context.
    ///
    /// The context is a nested JSON mapping; condition field paths are
    /// resolved by dotted lookup. Each evaluation sees a single snapshot.
    pub async fn evaluate(&self, context: &serde_json::Value) -> GatewayResult<RuleVerdict> {
        let rules = self.snapshot().await?;
        Ok(self.evaluate_snapshot(&rules, context))
    }

    /// Drop the cached snapshot so the next evaluation reloads.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn snapshot(&self) -> GatewayResult<Arc<Vec<FirewallRule>>> {
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.loaded_at.elapsed() < self.cache_ttl {
                    return Ok(Arc::clone(&snapshot.rules));
                }
            }
        }

        // Stale or empty: refresh under the write lock. A concurrent refresh
        // may duplicate the load; last writer wins.
        let rules = Arc::new(self.repo.load_enabled_rules().await?);
        let mut cache = self.cache.write().await;
        *cache = Some(Snapshot {
            rules: Arc::clone(&rules),
            loaded_at: Instant::now(),
        });
        tracing::debug!(rule_count = rules.len(), "Firewall rule cache refreshed");
        Ok(rules)
    }

    fn evaluate_snapshot(
        &self,
        rules: &[FirewallRule],
        context: &serde_json::Value,
    ) -> RuleVerdict {
        for rule in rules {
            if !self.rule_matches(rule, context) {
                continue;
            }
            match rule.kind {
                RuleKind::Deny => {
                    return RuleVerdict::Deny {
                        rule: rule.name.clone(),
                        reason: rule.deny_message(),
                    };
                }
                RuleKind::Allow => {
                    return RuleVerdict::Allow {
                        rule: Some(rule.name.clone()),
                    };
                }
                RuleKind::Conditional => {
                    tracing::info!(rule = %rule.name, "Conditional rule matched");
                }
            }
        }
        RuleVerdict::Allow { rule: None }
    }

    /// All conditions must match, in declaration order.
    fn rule_matches(&self, rule: &FirewallRule, context: &serde_json::Value) -> bool {
        rule.conditions
            .iter()
            .all(|condition| self.condition_matches(rule, condition, context))
    }

    fn condition_matches(
        &self,
        rule: &FirewallRule,
        condition: &RuleCondition,
        context: &serde_json::Value,
    ) -> bool {
        // Absent paths never match, for any operator.
        let Some(actual) = resolve_path(context, &condition.field) else {
            return false;
        };
        let actual_str = value_string(actual);

        match condition.operator {
            ConditionOperator::Eq => actual_str == operand_string(&condition.value),
            ConditionOperator::Neq => actual_str != operand_string(&condition.value),
            ConditionOperator::Contains => actual_str.contains(&operand_string(&condition.value)),
            ConditionOperator::Regex => {
                let pattern = operand_string(&condition.value);
                match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    Ok(re) => re.is_match(&actual_str),
                    Err(e) => {
                        let mut warned = self.regex_warned.lock().expect("regex_warned poisoned");
                        if warned.insert(rule.id) {
                            tracing::warn!(
                                rule = %rule.name,
                                pattern = %pattern,
                                error = %e,
                                "Invalid regex in rule condition; treated as non-matching"
                            );
                        }
                        false
                    }
                }
            }
            ConditionOperator::Gt => match (as_number(actual), number_operand(&condition.value)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::Lt => match (as_number(actual), number_operand(&condition.value)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            ConditionOperator::In => match condition.value.as_array() {
                Some(list) => list.iter().any(|member| value_string(member) == actual_str),
                None => false,
            },
        }
    }
}

/// Dotted walk over a nested JSON mapping.
fn resolve_path<'a>(context: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// String form of a context value.
fn value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// String form of a condition operand.
fn operand_string(value: &serde_json::Value) -> String {
    value_string(value)
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_operand(value: &serde_json::Value) -> Option<f64> {
    as_number(value)
}
