//! Prompt-Injection Detector - multi-signature matcher for agent content.
//!
//! Matches a fixed table of weighted, case-insensitive signatures against
//! the raw input, against decoded base64 substrings (recursively, bounded),
//! and against the unicode-unescaped form of the input when enough escape
//! sequences are present to suggest obfuscation.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Maximum recursion depth for nested base64 decoding. A bound against
/// decode bombs, not a completeness guarantee.
const MAX_BASE64_DEPTH: u32 = 3;

/// Minimum length of a base64 run worth decoding.
const MIN_BASE64_LEN: usize = 40;

/// Minimum number of `\uXXXX` escapes before the unescaped form is scanned.
const MIN_UNICODE_ESCAPES: usize = 5;

struct Signature {
    name: &'static str,
    weight: f64,
    regex: Regex,
}

fn signature(name: &'static str, weight: f64, pattern: &str) -> Signature {
    Signature {
        name,
        weight,
        regex: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static injection signature must compile"),
    }
}

static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        signature(
            "ignore_previous",
            0.9,
            r"ignore\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts|rules|directives)",
        ),
        signature(
            "disregard_instructions",
            0.85,
            r"disregard\s+(your|all|any|the)\s+(instructions|rules|guidelines|training)",
        ),
        signature(
            "forget_instructions",
            0.8,
            r"forget\s+(everything|all|your)\s+(above|previous|prior|instructions)",
        ),
        signature(
            "system_override",
            0.8,
            r"override\s+(your|the)\s+(system|safety|previous)|system\s+(prompt\s+)?override",
        ),
        signature("inst_token", 0.7, r"\[/?INST\]"),
        signature("im_start_token", 0.8, r"<\|im_start\|>"),
        signature("sys_token", 0.7, r"<<\s*/?SYS\s*>>"),
        signature("system_tag", 0.65, r"</?system>"),
        signature("jailbreak_keyword", 0.8, r"jail\s*break"),
        signature("dan_mode", 0.8, r"\bDAN\s+mode\b|\bdo\s+anything\s+now\b"),
        signature("developer_mode", 0.75, r"developer\s+mode|unrestricted\s+mode"),
        signature(
            "bypass_safety",
            0.9,
            r"bypass\s+(your\s+|all\s+)?(safety|security|filters|restrictions)",
        ),
        signature(
            "reveal_prompt",
            0.75,
            r"(reveal|show|print|repeat|output)\s+(your\s+)?(system\s+prompt|initial\s+(prompt|instructions)|hidden\s+instructions)",
        ),
        signature(
            "new_persona",
            0.7,
            r"you\s+are\s+now\s+(a|an|the)\b|pretend\s+(to\s+be|you\s+are)|act\s+as\s+if\s+you\s+(are|have)",
        ),
        signature(
            "no_restrictions",
            0.8,
            r"(without|no\s+longer\s+have|you\s+have\s+no)\s+(any\s+)?(restrictions|limitations|filters|guidelines)",
        ),
        signature(
            "admin_claim",
            0.6,
            r"i\s+am\s+(your\s+)?(developer|creator|administrator|admin|operator)",
        ),
    ]
});

static BASE64_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/]{40,}={0,2}").expect("base64 run regex"));

static UNICODE_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("unicode escape regex"));

/// Result of one detection pass.
#[derive(Debug, Clone)]
pub struct InjectionScan {
    /// Whether at least one signature matched on any scanned form.
    pub detected: bool,
    /// Names of the signatures that matched, in table order, deduplicated.
    pub patterns: Vec<String>,
    /// `min(1, max_weight + 0.05 * (matches - 1))`, or 0 with no match.
    pub confidence: f64,
}

/// Multi-signature prompt-injection matcher.
#[derive(Debug, Default, Clone)]
pub struct PromptInjectionDetector;

impl PromptInjectionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Scan a piece of content.
    pub fn detect(&self, input: &str) -> InjectionScan {
        let mut matched: Vec<(&'static str, f64)> = Vec::new();

        scan_text(input, &mut matched);
        scan_base64_runs(input, 0, &mut matched);

        if UNICODE_ESCAPE.find_iter(input).count() >= MIN_UNICODE_ESCAPES {
            let unescaped = unescape_unicode(input);
            scan_text(&unescaped, &mut matched);
        }

        let detected = !matched.is_empty();
        let confidence = if detected {
            let max_weight = matched
                .iter()
                .map(|(_, w)| *w)
                .fold(0.0_f64, f64::max);
            (max_weight + 0.05 * (matched.len() as f64 - 1.0)).min(1.0)
        } else {
            0.0
        };

        InjectionScan {
            detected,
            patterns: matched.iter().map(|(name, _)| name.to_string()).collect(),
            confidence,
        }
    }
}

fn scan_text(text: &str, matched: &mut Vec<(&'static str, f64)>) {
    for sig in SIGNATURES.iter() {
        if matched.iter().any(|(name, _)| *name == sig.name) {
            continue;
        }
        if sig.regex.is_match(text) {
            matched.push((sig.name, sig.weight));
        }
    }
}

/// Decode each base64-looking run and re-scan the plaintext, recursing into
/// nested encodings up to the depth bound.
fn scan_base64_runs(text: &str, depth: u32, matched: &mut Vec<(&'static str, f64)>) {
    if depth >= MAX_BASE64_DEPTH {
        return;
    }
    for run in BASE64_RUN.find_iter(text) {
        if run.as_str().len() < MIN_BASE64_LEN {
            continue;
        }
        let Some(decoded) = decode_base64_text(run.as_str()) else {
            continue;
        };
        scan_text(&decoded, matched);
        scan_base64_runs(&decoded, depth + 1, matched);
    }
}

/// Decode a base64 run to text, rejecting anything that decodes to bytes a
/// text payload would not contain (control bytes outside TAB/LF/CR).
fn decode_base64_text(run: &str) -> Option<String> {
    let bytes = BASE64.decode(run.as_bytes()).ok()?;
    if bytes
        .iter()
        .any(|&b| (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r') || b == 0x7f)
    {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Replace every `\uXXXX` escape with its character.
fn unescape_unicode(input: &str) -> String {
    UNICODE_ESCAPE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
