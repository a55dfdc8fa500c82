//! Threat Scorer - composite risk scoring for requests.
//!
//! A fixed table of weighted patterns is evaluated against the body and the
//! path, plus header, rate, and payload-size factors. Factors combine with
//! diminishing returns so the score stays inside [0, 1] and is monotone in
//! the set of triggered factors.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Headers whose presence alone is a proxy-abuse signal.
const SUSPICIOUS_HEADERS: &[&str] = &["x-forwarded-host", "x-original-url", "x-rewrite-url"];

const RATE_ANOMALY_REQUEST_FLOOR: u64 = 50;
const RATE_ANOMALY_WINDOW_MS: i64 = 1000;
const LARGE_PAYLOAD_BYTES: usize = 500_000;

struct WeightedPattern {
    name: &'static str,
    weight: f64,
    regex: Regex,
}

fn pattern(name: &'static str, weight: f64, pattern: &str, case_insensitive: bool) -> WeightedPattern {
    WeightedPattern {
        name,
        weight,
        regex: RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .expect("static threat pattern must compile"),
    }
}

static PATTERNS: Lazy<Vec<WeightedPattern>> = Lazy::new(|| {
    vec![
        pattern("path_traversal", 0.3, r"\.\./", false),
        pattern("xss_attempt", 0.4, r"<script[^>]*>", true),
        pattern("sql_injection", 0.5, r"union\s+select", true),
        pattern("sql_drop", 0.9, r";\s*drop\s+table", true),
        pattern("template_injection", 0.3, r"\$\{.*\}", false),
        pattern("env_access", 0.4, r"process\.env", true),
        pattern("command_exec", 0.6, r"child_process", true),
        pattern(
            "require_child_process",
            0.8,
            r#"require\s*\(\s*['"]child_process['"]\s*\)"#,
            true,
        ),
        pattern("exec_call", 0.5, r"exec\s*\(", true),
    ]
});

/// Input view for one scoring pass.
#[derive(Debug, Default)]
pub struct ScoreInput<'a> {
    pub body: &'a str,
    pub path: &'a str,
    pub headers: Option<&'a HashMap<String, String>>,
    /// Lifetime request counter from the agent context.
    pub request_count: u64,
    /// Milliseconds since the agent's previous request, when known.
    pub ms_since_last_request: Option<i64>,
}

/// Result of one scoring pass.
#[derive(Debug, Clone)]
pub struct ThreatAssessment {
    /// Composite score in [0, 1].
    pub score: f64,
    /// Triggered factor names with their weights. Path hits carry a
    /// `path_` prefix; consumers must not rely on the un-prefixed name
    /// existing for a path-only hit.
    pub factors: Vec<(String, f64)>,
}

impl ThreatAssessment {
    pub fn factor_names(&self) -> Vec<&str> {
        self.factors.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Stateless composite-risk scorer.
#[derive(Debug, Default, Clone)]
pub struct ThreatScorer;

impl ThreatScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score one request. Order of factor accumulation does not change the
    /// final value.
    pub fn score(&self, input: &ScoreInput<'_>) -> ThreatAssessment {
        let mut factors: Vec<(String, f64)> = Vec::new();

        for p in PATTERNS.iter() {
            if p.regex.is_match(input.body) {
                factors.push((p.name.to_string(), p.weight));
            }
            if p.regex.is_match(input.path) {
                factors.push((format!("path_{}", p.name), p.weight));
            }
        }

        if let Some(headers) = input.headers {
            let has_suspicious = headers
                .keys()
                .any(|name| SUSPICIOUS_HEADERS.contains(&name.to_lowercase().as_str()));
            if has_suspicious {
                factors.push(("suspicious_header".to_string(), 0.2));
            }
        }

        if input.request_count > RATE_ANOMALY_REQUEST_FLOOR {
            if let Some(ms) = input.ms_since_last_request {
                if ms < RATE_ANOMALY_WINDOW_MS {
                    factors.push(("rate_anomaly".to_string(), 0.3));
                }
            }
        }

        if input.body.len() > LARGE_PAYLOAD_BYTES {
            factors.push(("large_payload".to_string(), 0.2));
        }

        // score <- score + w * (1 - score): bounded in [0, 1], monotone,
        // diminishing returns, order-independent.
        let score = factors
            .iter()
            .fold(0.0_f64, |score, (_, weight)| score + weight * (1.0 - score));

        ThreatAssessment { score, factors }
    }
}
