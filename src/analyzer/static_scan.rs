//! Static Code Analyzer - source scan for dangerous constructs.
//!
//! The candidate is first compile-checked as an ES module; code that does
//! not parse is reported as `parse_error` at severity info (obfuscated or
//! truncated code is suspicious, but a parse failure alone is never
//! critical). Code that parses is scanned construct by construct with
//! source locations, and the overall severity is the maximum of the
//! findings.

use once_cell::sync::Lazy;
use regex::Regex;
use rquickjs::{CatchResultExt, Context, Module, Runtime};

use crate::domain::{Severity, Vulnerability, VulnerabilityKind};

/// Modules whose load is outright dangerous.
const DANGEROUS_MODULES: &[&str] = &["child_process", "cluster", "dgram", "dns", "net", "tls"];

/// Modules that grant filesystem access.
const FS_MODULES: &[&str] = &["fs", "fs/promises"];

/// Member names that walk out of the sandboxed value graph.
const ESCAPE_PROPERTIES: &[&str] = &["constructor", "__proto__", "prototype"];

static RE_EVAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\beval\s*\(").unwrap());
static RE_FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bFunction\s*\(").unwrap());
static RE_NEW_FUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bnew\s+Function\b").unwrap());
static RE_TIMER_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(setTimeout|setInterval)\s*\(").unwrap());
static RE_REQUIRE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static RE_FETCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfetch\s*\(").unwrap());
static RE_FETCH_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfetch\s*\(\s*['"]([^'"]*)['"]"#).unwrap());
static RE_NEW_PROXY_REFLECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnew\s+(Proxy|Reflect)\b").unwrap());
static RE_PROXY_REFLECT_MEMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(Proxy|Reflect)\s*\.").unwrap());
static RE_ESCAPE_MEMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*(constructor|__proto__|prototype)\b").unwrap());
static RE_ESCAPE_COMPUTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[\s*['"](constructor|__proto__|prototype)['"]\s*\]"#).unwrap());
static RE_ARGUMENTS_CALLEE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\barguments\s*\.\s*callee\b").unwrap());
static RE_DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bimport\s*\(").unwrap());
static RE_WITH_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bwith\s*\(").unwrap());
static RE_IMPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(?:[\w$*{},\s]+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static RE_PROCESS_ENV: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bprocess\s*\.\s*env\b").unwrap());
static RE_HEX_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+$").unwrap());
static RE_BASE64_SHAPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap());
static RE_UNICODE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\u[0-9a-fA-F]{4}").unwrap());

/// Result of one static pass.
#[derive(Debug, Clone)]
pub struct StaticReport {
    pub vulnerabilities: Vec<Vulnerability>,
    pub patterns: Vec<String>,
    /// Maximum severity across the findings; info for a clean scan.
    pub severity: Severity,
}

/// Source scanner for agent-supplied code.
#[derive(Debug, Default, Clone)]
pub struct StaticCodeAnalyzer;

impl StaticCodeAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze one candidate.
    pub fn analyze(&self, code: &str) -> StaticReport {
        if let Some(parse_error) = module_parse_error(code) {
            let vulnerability = Vulnerability {
                kind: VulnerabilityKind::ParseError,
                severity: Severity::Info,
                message: parse_error,
                line: None,
                column: None,
            };
            return StaticReport {
                vulnerabilities: vec![vulnerability],
                patterns: vec!["Parse error - code may be obfuscated".to_string()],
                severity: Severity::Info,
            };
        }

        let mut scan = Scan::default();
        for (index, line) in code.lines().enumerate() {
            scan.scan_line(index as u32 + 1, line);
        }

        let severity = scan
            .vulnerabilities
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::Info);

        StaticReport {
            vulnerabilities: scan.vulnerabilities,
            patterns: scan.patterns,
            severity,
        }
    }
}

/// Compile-only ES-module parse check. Returns the parser message on
/// failure, `None` when the source parses (or when the engine itself
/// cannot start, in which case the scan alone decides).
fn module_parse_error(code: &str) -> Option<String> {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::warn!(error = %e, "Parse check unavailable; scanning source only");
            return None;
        }
    };
    let context = match Context::full(&runtime) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!(error = %e, "Parse check unavailable; scanning source only");
            return None;
        }
    };

    context.with(|ctx| {
        // Module grammar first (covers import/export declarations).
        if Module::declare(ctx.clone(), "candidate", code).catch(&ctx).is_ok() {
            return None;
        }

        // Retry as a classic function body: module grammar is strict, so
        // constructs like `with` only parse here. The function expression
        // is compiled but its body never runs.
        let wrapped = format!("(function(){{\n{}\n}})", code);
        match ctx.eval::<rquickjs::Value, _>(wrapped).catch(&ctx) {
            Ok(_) => None,
            Err(e) => Some(format!("Parse failed: {}", e)),
        }
    })
}

#[derive(Default)]
struct Scan {
    vulnerabilities: Vec<Vulnerability>,
    patterns: Vec<String>,
    /// Carries `/* ... */` state across lines.
    in_block_comment: bool,
}

impl Scan {
    fn report(
        &mut self,
        kind: VulnerabilityKind,
        severity: Severity,
        message: String,
        line: u32,
        column: usize,
    ) {
        self.patterns.push(message.clone());
        self.vulnerabilities.push(Vulnerability {
            kind,
            severity,
            message,
            line: Some(line),
            column: Some(column as u32 + 1),
        });
    }

    /// Blank comment text and collect string-literal content spans, so the
    /// construct detectors only see live code. Offsets are preserved:
    /// blanked bytes become spaces.
    fn mask_line(&mut self, raw: &str) -> (String, Vec<(usize, usize)>) {
        let bytes = raw.as_bytes();
        let len = bytes.len();
        let mut masked = bytes.to_vec();
        let mut literals = Vec::new();
        let mut i = 0;

        while i < len {
            if self.in_block_comment {
                if bytes[i] == b'*' && i + 1 < len && bytes[i + 1] == b'/' {
                    masked[i] = b' ';
                    masked[i + 1] = b' ';
                    self.in_block_comment = false;
                    i += 2;
                } else {
                    masked[i] = b' ';
                    i += 1;
                }
                continue;
            }

            match bytes[i] {
                b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                    for b in masked.iter_mut().take(len).skip(i) {
                        *b = b' ';
                    }
                    break;
                }
                b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                    masked[i] = b' ';
                    masked[i + 1] = b' ';
                    self.in_block_comment = true;
                    i += 2;
                }
                quote @ (b'\'' | b'"' | b'`') => {
                    let start = i + 1;
                    let mut j = start;
                    while j < len {
                        if bytes[j] == b'\\' {
                            j += 2;
                            continue;
                        }
                        if bytes[j] == quote {
                            break;
                        }
                        j += 1;
                    }
                    literals.push((start, j.min(len)));
                    i = if j < len { j + 1 } else { len };
                }
                _ => {
                    i += 1;
                }
            }
        }

        (String::from_utf8_lossy(&masked).into_owned(), literals)
    }

    fn scan_line(&mut self, line_no: u32, raw: &str) {
        use Severity::*;
        use VulnerabilityKind::*;

        let (masked, literals) = self.mask_line(raw);
        let line = masked.as_str();
        let in_literal =
            |pos: usize| literals.iter().any(|&(start, end)| pos >= start && pos < end);

        for m in RE_EVAL.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(DangerousFunction, Critical, "Use of eval".to_string(), line_no, m.start());
        }

        for m in RE_NEW_FUNCTION.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(
                DangerousFunction,
                Critical,
                "Function constructor via new".to_string(),
                line_no,
                m.start(),
            );
        }

        for m in RE_FUNCTION_CALL.find_iter(line) {
            // `new Function(...)` is reported above; only plain calls here
            if in_literal(m.start()) || preceded_by_new(&line[..m.start()]) {
                continue;
            }
            self.report(
                DangerousFunction,
                High,
                "Call to Function".to_string(),
                line_no,
                m.start(),
            );
        }

        for caps in RE_TIMER_CALL.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            if in_literal(m.start()) {
                continue;
            }
            let name = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            self.report(
                DangerousFunction,
                High,
                format!("Call to {}", name),
                line_no,
                m.start(),
            );
        }

        for caps in RE_REQUIRE_LITERAL.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            if in_literal(m.start()) {
                continue;
            }
            let module = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            self.classify_module(module, "require of", line_no, m.start());
        }

        for m in RE_FETCH.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            if let Some(caps) = RE_FETCH_LITERAL
                .captures(&line[m.start()..])
                .filter(|caps| caps.get(0).map(|g| g.start()) == Some(0))
            {
                let url = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
                self.report(
                    NetworkRequest,
                    Medium,
                    format!("Network request to {}", url),
                    line_no,
                    m.start(),
                );
            } else {
                self.report(
                    NetworkRequest,
                    High,
                    "Network request to a computed URL".to_string(),
                    line_no,
                    m.start(),
                );
            }
        }

        for caps in RE_NEW_PROXY_REFLECT.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            if in_literal(m.start()) {
                continue;
            }
            let name = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            self.report(
                SandboxEscape,
                Critical,
                format!("Construction of {}", name),
                line_no,
                m.start(),
            );
        }

        for caps in RE_PROXY_REFLECT_MEMBER.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            // `new Proxy(...)` is already covered; don't double-report it
            if in_literal(m.start()) || preceded_by_new(&line[..m.start()]) {
                continue;
            }
            let name = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            self.report(
                SandboxEscape,
                Critical,
                format!("Member access on {}", name),
                line_no,
                m.start(),
            );
        }

        for caps in RE_ESCAPE_MEMBER.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            if in_literal(m.start()) {
                continue;
            }
            let prop = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            if ESCAPE_PROPERTIES.contains(&prop) {
                self.report(
                    SandboxEscape,
                    Critical,
                    format!("Access to {}", prop),
                    line_no,
                    m.start(),
                );
            }
        }

        for caps in RE_ESCAPE_COMPUTED.captures_iter(line) {
            let m = caps.get(0).expect("whole match");
            if in_literal(m.start()) {
                continue;
            }
            let prop = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
            self.report(
                SandboxEscape,
                Critical,
                format!("Computed access to {}", prop),
                line_no,
                m.start(),
            );
        }

        for m in RE_ARGUMENTS_CALLEE.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(
                SandboxEscape,
                Critical,
                "Access to arguments.callee".to_string(),
                line_no,
                m.start(),
            );
        }

        for m in RE_DYNAMIC_IMPORT.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(
                DynamicImport,
                Critical,
                "Dynamic import".to_string(),
                line_no,
                m.start(),
            );
        }

        for m in RE_WITH_STATEMENT.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(
                SandboxEscape,
                Critical,
                "with statement".to_string(),
                line_no,
                m.start(),
            );
        }

        if let Some(caps) = RE_IMPORT_DECL.captures(line) {
            let m = caps.get(0).expect("whole match");
            if !in_literal(m.start()) {
                let module = caps.get(1).map(|g| g.as_str()).unwrap_or_default();
                self.classify_module(module, "import of", line_no, m.start());
            }
        }

        for m in RE_PROCESS_ENV.find_iter(line) {
            if in_literal(m.start()) {
                continue;
            }
            self.report(
                EnvAccess,
                High,
                "Access to process.env".to_string(),
                line_no,
                m.start(),
            );
        }

        for &(start, end) in &literals {
            let content = &line[start..end];
            if let Some(label) = obfuscation_label(content) {
                self.report(
                    Obfuscation,
                    Medium,
                    label.to_string(),
                    line_no,
                    start.saturating_sub(1),
                );
            }
        }
    }

    fn classify_module(&mut self, module: &str, via: &str, line_no: u32, column: usize) {
        let plain = module.strip_prefix("node:").unwrap_or(module);

        if DANGEROUS_MODULES.contains(&plain) {
            self.report(
                VulnerabilityKind::DangerousModule,
                Severity::Critical,
                format!("Dangerous {} {}", via, module),
                line_no,
                column,
            );
        } else if FS_MODULES.contains(&plain) {
            self.report(
                VulnerabilityKind::FilesystemAccess,
                Severity::High,
                format!("Filesystem {} {}", via, module),
                line_no,
                column,
            );
        }
    }
}

/// Whether the text before a match ends with the keyword `new`.
fn preceded_by_new(prefix: &str) -> bool {
    prefix
        .trim_end()
        .rsplit(|c: char| !c.is_alphanumeric() && c != '_' && c != '$')
        .next()
        == Some("new")
}

/// Classify a string literal as likely-obfuscated payload.
fn obfuscation_label(content: &str) -> Option<&'static str> {
    if content.len() >= 30 && RE_HEX_ONLY.is_match(content) {
        return Some("Long hex string literal");
    }
    if content.len() >= 50 && RE_BASE64_SHAPED.is_match(content) {
        return Some("Long base64-shaped string literal");
    }
    if RE_UNICODE_ESCAPE.find_iter(content).count() >= 5 {
        return Some("Unicode-escaped string literal");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(code: &str) -> StaticReport {
        StaticCodeAnalyzer::new().analyze(code)
    }

    fn kinds(report: &StaticReport) -> Vec<VulnerabilityKind> {
        report.vulnerabilities.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_benign_code_is_clean() {
        let report = analyze("const arr = [1,2,3].map(n => n*2);");
        assert!(report.vulnerabilities.is_empty());
        assert_eq!(report.severity, Severity::Info);
    }

    #[test]
    fn test_eval_is_critical() {
        let report = analyze("function run(c){return eval(c);}");
        assert_eq!(report.severity, Severity::Critical);
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.kind, VulnerabilityKind::DangerousFunction);
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.line, Some(1));
    }

    #[test]
    fn test_constructor_chain_is_sandbox_escape() {
        let report = analyze("const c = this.constructor.constructor('return process')();");
        assert_eq!(report.severity, Severity::Critical);
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));
    }

    #[test]
    fn test_new_function_is_critical_plain_call_high() {
        let report = analyze("const f = new Function('return 1');");
        assert_eq!(report.severity, Severity::Critical);

        let report = analyze("const f = Function('return 1');");
        assert_eq!(report.severity, Severity::High);
        assert_eq!(
            report.vulnerabilities[0].kind,
            VulnerabilityKind::DangerousFunction
        );
    }

    #[test]
    fn test_timers_are_high() {
        let report = analyze("setTimeout(() => poll(), 50); setInterval(tick, 100);");
        assert_eq!(report.severity, Severity::High);
        assert_eq!(report.vulnerabilities.len(), 2);
    }

    #[test]
    fn test_require_classification() {
        let report = analyze("const cp = require('child_process');");
        assert_eq!(report.severity, Severity::Critical);
        assert!(kinds(&report).contains(&VulnerabilityKind::DangerousModule));

        let report = analyze("const fs = require('node:fs');");
        assert_eq!(report.severity, Severity::High);
        assert!(kinds(&report).contains(&VulnerabilityKind::FilesystemAccess));

        let report = analyze("const leftPad = require('left-pad');");
        assert!(report.vulnerabilities.is_empty());
    }

    #[test]
    fn test_import_declarations() {
        let report = analyze("import net from 'net';\nexport const x = 1;");
        assert_eq!(report.severity, Severity::Critical);
        assert!(kinds(&report).contains(&VulnerabilityKind::DangerousModule));

        let report = analyze("import { readFile } from 'fs/promises';");
        assert_eq!(report.severity, Severity::High);
        assert!(kinds(&report).contains(&VulnerabilityKind::FilesystemAccess));
    }

    #[test]
    fn test_dynamic_import_is_critical() {
        let report = analyze("const mod = await import(name);");
        assert!(kinds(&report).contains(&VulnerabilityKind::DynamicImport));
        assert_eq!(report.severity, Severity::Critical);
    }

    #[test]
    fn test_fetch_literal_vs_computed() {
        let report = analyze("fetch('https://api.example.com/data');");
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.kind, VulnerabilityKind::NetworkRequest);
        assert_eq!(vuln.severity, Severity::Medium);
        assert!(vuln.message.contains("https://api.example.com/data"));

        let report = analyze("fetch(buildUrl());");
        assert_eq!(report.vulnerabilities[0].severity, Severity::High);
    }

    #[test]
    fn test_proxy_and_reflect() {
        let report = analyze("const p = new Proxy({}, {});");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));

        let report = analyze("Reflect.get(target, 'secret');");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));
    }

    #[test]
    fn test_proto_and_computed_access() {
        let report = analyze("obj.__proto__.polluted = true;");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));

        let report = analyze("const ctor = obj['constructor'];");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));
    }

    #[test]
    fn test_arguments_callee_and_with() {
        let report = analyze("function f(){ return arguments.callee; }");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));

        let report = analyze("with (obj) { run(); }");
        assert!(kinds(&report).contains(&VulnerabilityKind::SandboxEscape));
    }

    #[test]
    fn test_process_env_is_high() {
        let report = analyze("const key = process.env.API_KEY;");
        assert_eq!(report.severity, Severity::High);
        assert!(kinds(&report).contains(&VulnerabilityKind::EnvAccess));
    }

    #[test]
    fn test_obfuscated_literals_are_medium() {
        let hex = "a".repeat(15) + &"1".repeat(15);
        let report = analyze(&format!("const payload = '{}';", hex));
        assert_eq!(report.severity, Severity::Medium);
        assert!(kinds(&report).contains(&VulnerabilityKind::Obfuscation));

        let b64 = "QUJD".repeat(13);
        let report = analyze(&format!("const blob = \"{}\";", b64));
        assert!(kinds(&report).contains(&VulnerabilityKind::Obfuscation));
    }

    #[test]
    fn test_short_literals_are_not_obfuscation() {
        let report = analyze("const color = 'deadbeef';");
        assert!(report.vulnerabilities.is_empty());
    }

    #[test]
    fn test_line_comments_are_not_flagged() {
        let report = analyze("// never call eval(x) here\nconst ok = 1;");
        assert!(report.vulnerabilities.is_empty());
        assert_eq!(report.severity, Severity::Info);
    }

    #[test]
    fn test_string_literals_are_not_flagged() {
        let report = analyze(
            "const msg = \"do not use eval(input)\";\nconst tip = \"require('child_process') is banned\";",
        );
        assert!(report.vulnerabilities.is_empty());
    }

    #[test]
    fn test_block_comments_span_lines() {
        let report = analyze("/*\nrequire('child_process');\neval(x);\n*/\nconst x = 1;");
        assert!(report.vulnerabilities.is_empty());
    }

    #[test]
    fn test_trailing_comment_does_not_hide_code() {
        let report = analyze("const cp = require('child_process'); // process helper");
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(
            report.vulnerabilities[0].kind,
            VulnerabilityKind::DangerousModule
        );
        assert_eq!(report.severity, Severity::Critical);
    }

    #[test]
    fn test_double_slash_inside_string_is_not_a_comment() {
        // The // in the URL must not truncate the line
        let report = analyze("fetch(\"https://example.test/a//b\");");
        assert_eq!(report.vulnerabilities.len(), 1);
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.kind, VulnerabilityKind::NetworkRequest);
        assert!(vuln.message.contains("https://example.test/a//b"));
    }

    #[test]
    fn test_escaped_quote_does_not_end_literal() {
        let report = analyze(r#"const s = "she said \"eval(x)\" loudly";"#);
        assert!(report.vulnerabilities.is_empty());
    }

    #[test]
    fn test_parse_error_is_info_never_critical() {
        let report = analyze("function ( { ] this is not javascript");
        assert_eq!(report.severity, Severity::Info);
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(report.vulnerabilities[0].kind, VulnerabilityKind::ParseError);
        assert_eq!(
            report.patterns,
            vec!["Parse error - code may be obfuscated".to_string()]
        );
    }

    #[test]
    fn test_locations_are_one_based() {
        let report = analyze("const a = 1;\nconst b = eval('2');");
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.line, Some(2));
        assert_eq!(vuln.column, Some(11));
    }

    #[test]
    fn test_severity_is_maximum_of_findings() {
        let report = analyze(
            "const key = process.env.TOKEN;\nfetch('https://x.test');\neval('boom');",
        );
        assert_eq!(report.severity, Severity::Critical);
        assert_eq!(report.vulnerabilities.len(), 3);
    }
}
