//! Exfiltration Detector - classifies outbound `api_call` messages.
//!
//! Only `api_call` messages with a parsable URL are considered. A call is
//! flagged when its body is either very large or matches a sensitive
//! credential pattern while bound for a host outside the agent's trusted
//! domains. Bodies bound for trusted hosts are never inspected.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use url::Url;

use crate::domain::{AgentContext, AgentMessage, MessageKind};

/// Upload size above which an untrusted destination is flagged.
const LARGE_UPLOAD_BYTES: usize = 100_000;

static SENSITIVE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let build = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static sensitive pattern must compile")
    };
    vec![
        ("api_key", build(r"api_?key\s*[=:]")),
        ("password", build(r"password\s*[=:]")),
        ("secret", build(r"secret\s*[=:]")),
        ("token", build(r"token\s*[=:]")),
        ("private_key", build(r"private_key")),
    ]
});

/// Why a message was classified as exfiltration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExfilFinding {
    /// Body larger than the upload cap, destination untrusted.
    LargeUpload { host: String, size: usize },
    /// Body matches a credential pattern, destination untrusted.
    SensitivePayload { host: String, pattern: String },
}

impl ExfilFinding {
    pub fn host(&self) -> &str {
        match self {
            ExfilFinding::LargeUpload { host, .. } => host,
            ExfilFinding::SensitivePayload { host, .. } => host,
        }
    }
}

/// Destination-trust and payload-sensitivity classifier.
#[derive(Debug, Default, Clone)]
pub struct ExfiltrationDetector;

impl ExfiltrationDetector {
    pub fn new() -> Self {
        Self
    }

    /// Inspect one message against the sending agent's trust list.
    ///
    /// Anything that is not an `api_call`, has no URL, or has an unparsable
    /// URL is benign.
    pub fn check(&self, message: &AgentMessage, agent: &AgentContext) -> Option<ExfilFinding> {
        if message.kind != MessageKind::ApiCall {
            return None;
        }
        let url = message.url.as_deref()?;
        let host = Url::parse(url).ok()?.host_str()?.to_lowercase();

        if host_is_trusted(&host, &agent.trusted_domains) {
            return None;
        }

        let body = message.body.as_deref().unwrap_or("");

        if body.len() > LARGE_UPLOAD_BYTES {
            return Some(ExfilFinding::LargeUpload {
                host,
                size: body.len(),
            });
        }

        for (name, regex) in SENSITIVE_PATTERNS.iter() {
            if regex.is_match(body) {
                return Some(ExfilFinding::SensitivePayload {
                    host,
                    pattern: (*name).to_string(),
                });
            }
        }

        None
    }
}

/// Case-insensitive trust check: exact host or suffix match on
/// `.<trusted>`.
fn host_is_trusted(host: &str, trusted_domains: &[String]) -> bool {
    trusted_domains.iter().any(|trusted| {
        let trusted = trusted.to_lowercase();
        host == trusted || host.ends_with(&format!(".{}", trusted))
    })
}
