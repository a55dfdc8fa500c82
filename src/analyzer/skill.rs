//! Skill Analyzer - coordinates the static, injection, and dynamic stages.
//!
//! Stages run in a fixed order with early exits: critical static findings,
//! confident prompt-injection hits, observed unsafe behavior, and malware
//! signature matches each terminate with a fixed risk score. Anything else
//! fuses the stage outputs into a weighted score clamped to [0, 1].

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::analyzer::{DynamicAnalysis, DynamicCodeAnalyzer, StaticCodeAnalyzer};
use crate::domain::{MalwareSignature, Severity, SkillAnalysis};
use crate::engine::PromptInjectionDetector;

/// Injection confidence above which skill code is rejected outright.
const INJECTION_CONFIDENCE_CUTOFF: f64 = 0.7;

/// Risk fused per dynamic network or filesystem attempt.
const ATTEMPT_WEIGHT: f64 = 0.1;

/// Risk fused per other suspicious behavior.
const BEHAVIOR_WEIGHT: f64 = 0.15;

/// Risk fused from the injection confidence.
const INJECTION_WEIGHT: f64 = 0.3;

/// Fused score below which a skill is considered safe.
const SAFE_CUTOFF: f64 = 0.5;

/// Three-stage analyzer for agent-supplied skills.
pub struct SkillAnalyzer {
    static_analyzer: StaticCodeAnalyzer,
    injection: PromptInjectionDetector,
    dynamic: DynamicCodeAnalyzer,
    signatures: Vec<MalwareSignature>,
    default_timeout: Duration,
}

impl SkillAnalyzer {
    pub fn new(dynamic: DynamicCodeAnalyzer, default_timeout: Duration) -> Self {
        Self {
            static_analyzer: StaticCodeAnalyzer::new(),
            injection: PromptInjectionDetector::new(),
            dynamic,
            signatures: Vec::new(),
            default_timeout,
        }
    }

    /// Install the malware signature table.
    pub fn with_signatures(mut self, signatures: Vec<MalwareSignature>) -> Self {
        self.signatures = signatures;
        self
    }

    /// Stable cache key: lowercase SHA-256 hex of the UTF-8 code.
    pub fn code_hash(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    /// Analyze one candidate skill.
    pub async fn analyze(&self, code: &str, timeout: Option<Duration>) -> SkillAnalysis {
        let started = Instant::now();

        // Stage 1: static scan.
        let static_report = self.static_analyzer.analyze(code);
        if static_report.severity == Severity::Critical {
            return SkillAnalysis {
                safe: false,
                risk_score: 1.0,
                reason: Some("Critical vulnerabilities found".to_string()),
                vulnerabilities: static_report.vulnerabilities,
                patterns: static_report.patterns,
                behaviors: Vec::new(),
                signature: None,
                analysis_time_ms: elapsed_ms(started),
            };
        }

        // Stage 2: prompt injection over the raw code body.
        let injection_scan = self.injection.detect(code);
        if injection_scan.detected && injection_scan.confidence > INJECTION_CONFIDENCE_CUTOFF {
            let mut patterns = static_report.patterns.clone();
            patterns.extend(injection_scan.patterns.clone());
            return SkillAnalysis {
                safe: false,
                risk_score: 0.9,
                reason: Some("Prompt injection patterns".to_string()),
                vulnerabilities: static_report.vulnerabilities,
                patterns,
                behaviors: Vec::new(),
                signature: None,
                analysis_time_ms: elapsed_ms(started),
            };
        }

        // Stage 3: sandboxed execution.
        let timeout = timeout.unwrap_or(self.default_timeout);
        let (dynamic, dynamic_unavailable) = match self.dynamic.execute(code, timeout).await {
            Ok(result) => (Some(result), false),
            Err(e) => {
                tracing::warn!(error = %e, "Dynamic stage unavailable; static verdict only");
                (None, true)
            }
        };

        if let Some(dynamic) = dynamic.as_ref().filter(|d| !d.safe) {
            return SkillAnalysis {
                safe: false,
                risk_score: 0.8,
                reason: Some("Unsafe behavior detected".to_string()),
                vulnerabilities: static_report.vulnerabilities,
                patterns: static_report.patterns,
                behaviors: annotated_behaviors(dynamic),
                signature: None,
                analysis_time_ms: elapsed_ms(started),
            };
        }

        // Stage 4: malware signatures (hash first, then regex).
        if let Some(signature) = self.match_signature(code) {
            return SkillAnalysis {
                safe: false,
                risk_score: 1.0,
                reason: Some("Known malware signature".to_string()),
                vulnerabilities: static_report.vulnerabilities,
                patterns: static_report.patterns,
                behaviors: Vec::new(),
                signature: Some(signature),
                analysis_time_ms: elapsed_ms(started),
            };
        }

        // Stage 5: fuse the remaining signals.
        let mut risk_score: f64 = static_report
            .vulnerabilities
            .iter()
            .map(|v| v.severity.risk_weight())
            .sum();

        if let Some(dynamic) = dynamic.as_ref() {
            risk_score += ATTEMPT_WEIGHT
                * (dynamic.network_attempts.len() + dynamic.fs_attempts.len()) as f64;
            risk_score += BEHAVIOR_WEIGHT * dynamic.suspicious_behavior.len() as f64;
        }

        risk_score += injection_scan.confidence * INJECTION_WEIGHT;
        risk_score = risk_score.min(1.0);

        let safe = risk_score < SAFE_CUTOFF;
        let reason = if dynamic_unavailable {
            Some("dynamic analysis unavailable".to_string())
        } else if !safe {
            Some("Elevated risk score".to_string())
        } else {
            None
        };

        SkillAnalysis {
            safe,
            risk_score,
            reason,
            vulnerabilities: static_report.vulnerabilities,
            patterns: static_report.patterns,
            behaviors: dynamic.map(annotated_behaviors_ref).unwrap_or_default(),
            signature: None,
            analysis_time_ms: elapsed_ms(started),
        }
    }

    fn match_signature(&self, code: &str) -> Option<String> {
        let hash = Self::code_hash(code);

        for signature in &self.signatures {
            if signature.hash.as_deref() == Some(hash.as_str()) {
                return Some(signature.name.clone());
            }
        }

        for signature in &self.signatures {
            let Some(pattern) = signature.pattern.as_deref() else {
                continue;
            };
            match regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) if re.is_match(code) => return Some(signature.name.clone()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        signature = %signature.name,
                        error = %e,
                        "Skipping malware signature with invalid pattern"
                    );
                }
            }
        }

        None
    }
}

fn annotated_behaviors(dynamic: &DynamicAnalysis) -> Vec<String> {
    let mut behaviors = dynamic.suspicious_behavior.clone();
    behaviors.extend(
        dynamic
            .network_attempts
            .iter()
            .map(|url| format!("Network: {}", url)),
    );
    behaviors.extend(dynamic.fs_attempts.iter().map(|entry| format!("FS: {}", entry)));
    behaviors
}

fn annotated_behaviors_ref(dynamic: DynamicAnalysis) -> Vec<String> {
    annotated_behaviors(&dynamic)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
