//! Logging and tracing setup for ClawShield.
//!
//! Output is driven by the `log` section of the gateway configuration:
//! JSON lines with span context for shipping, or compact lines for local
//! runs. Every proxied request runs inside a `tower_http` span, so closing
//! spans are emitted to capture per-request latency.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Initialize the tracing subscriber from the gateway's log configuration.
///
/// An explicit `RUST_LOG` replaces the whole filter; otherwise the
/// configured level applies to the gateway and its HTTP layer while noisy
/// infrastructure targets stay at warn.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(false),
            )
            .init(),
    }
}

/// Filter directives applied when `RUST_LOG` is unset: the gateway and the
/// request-tracing layer at the configured level, chatty dependencies
/// capped at warn.
fn default_directives(level: &str) -> String {
    format!("clawshield={level},tower_http={level},sqlx=warn,hyper=warn,reqwest=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_the_level() {
        let directives = default_directives("debug");
        assert!(directives.contains("clawshield=debug"));
        assert!(directives.contains("tower_http=debug"));
        // Infrastructure noise stays capped regardless of the base level
        assert!(directives.contains("sqlx=warn"));
    }

    #[test]
    fn test_directives_parse_as_a_filter() {
        // EnvFilter::new is lossy; make sure our directives survive a
        // round-trip instead of being silently dropped
        let filter = EnvFilter::new(default_directives("info"));
        let rendered = filter.to_string();
        assert!(rendered.contains("clawshield=info"));
        assert!(rendered.contains("hyper=warn"));
    }
}
