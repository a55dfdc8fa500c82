//! Configuration module for ClawShield.
//!
//! Loads configuration from YAML files and environment variables.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// When set, 500 responses carry error detail instead of a generic body.
    #[serde(default)]
    pub debug_errors: bool,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Downstream host the gateway fronts.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL for proxied HTTP requests, e.g. `http://127.0.0.1:4000`.
    pub http_url: String,
    /// URL for the upstream WebSocket leg, e.g. `ws://127.0.0.1:4000/ws`.
    pub ws_url: String,
}

/// Firewall policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConfig {
    /// Composite threat score above which a request is denied.
    pub threat_score_threshold: f64,
    /// Per-minute request cap applied when the agent row carries none.
    pub default_rate_limit_per_minute: u32,
    /// How long a blacklist entry lives, in seconds.
    pub blacklist_ttl_secs: u64,
    /// Firewall rule cache time-to-live, in seconds.
    pub rule_cache_ttl_secs: u64,
    /// Concurrent WebSocket connections allowed per client IP.
    pub max_ws_connections_per_ip: usize,
}

/// Skill analyzer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Default wall-clock budget for dynamic execution, in milliseconds.
    pub default_timeout_ms: u64,
    /// Advisory memory cap for the sandbox, in bytes.
    pub memory_limit_bytes: usize,
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertConfig {
    /// Webhook URL for critical threat alerts. Alerting is disabled when absent.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable JSON lines, for shipping.
    Json,
    /// Compact human-readable lines, for local runs.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Base level for the gateway's own targets. `RUST_LOG` overrides the
    /// whole filter when set.
    pub level: String,
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (CLAWSHIELD_*)
    /// 2. config/local.yaml (if exists)
    /// 3. config/default.yaml
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Start with default config
            .add_source(File::with_name("config/default").required(false))
            // Layer on local overrides
            .add_source(File::with_name("config/local").required(false))
            // Layer on environment variables with CLAWSHIELD_ prefix
            .add_source(
                Environment::with_prefix("CLAWSHIELD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug_errors: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://clawshield.db?mode=rwc".to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            http_url: "http://127.0.0.1:4000".to_string(),
            ws_url: "ws://127.0.0.1:4000/ws".to_string(),
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            threat_score_threshold: 0.8,
            default_rate_limit_per_minute: 100,
            blacklist_ttl_secs: 3600,
            rule_cache_ttl_secs: 30,
            max_ws_connections_per_ip: 5,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            memory_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_firewall_config() {
        let config = FirewallConfig::default();
        assert_eq!(config.threat_score_threshold, 0.8);
        assert_eq!(config.default_rate_limit_per_minute, 100);
        assert_eq!(config.rule_cache_ttl_secs, 30);
        assert_eq!(config.max_ws_connections_per_ip, 5);
    }

    #[test]
    fn test_default_analyzer_config() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.default_timeout_ms, 5_000);
        assert_eq!(config.memory_limit_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_parses_lowercase() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }
}
