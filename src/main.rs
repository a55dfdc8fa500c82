//! ClawShield - inline security gateway for autonomous AI agents.
//!
//! The gateway terminates agent HTTP and WebSocket traffic, inspects every
//! request and streamed message against policy, forwards only approved
//! traffic to the downstream host, and analyzes agent-supplied skills
//! before they are allowed to run.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePool;
use tokio::net::TcpListener;

mod alert;
mod analyzer;
mod api;
mod config;
mod crypto;
mod domain;
mod engine;
mod error;
mod logging;
mod proxy;
mod storage;

use crate::alert::{AlertHandler, WebhookAlertHandler};
use crate::analyzer::{DynamicCodeAnalyzer, SkillAnalyzer};
use crate::api::build_router;
use crate::config::{Config, UpstreamConfig};
use crate::engine::{FirewallOrchestrator, OrchestratorConfig, ResponseScrubber};
use crate::proxy::WsConnectionTracker;
use crate::storage::{GatewayRepository, MemoryKv};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The firewall pipeline.
    pub orchestrator: Arc<FirewallOrchestrator>,
    /// The skill analysis pipeline.
    pub analyzer: Arc<SkillAnalyzer>,
    /// Database repository.
    pub repository: GatewayRepository,
    /// Post-proxy response inspector.
    pub scrubber: Arc<ResponseScrubber>,
    /// Client for forwarded HTTP requests.
    pub http_client: reqwest::Client,
    /// Downstream host endpoints.
    pub upstream: UpstreamConfig,
    /// Per-IP WebSocket connection accounting.
    pub ws_limiter: Arc<WsConnectionTracker>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file loaded ({e})");
    }

    // Load configuration before logging: the log format and level come
    // from it. Failures here can only go to stderr.
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    logging::init(&config.log);

    tracing::info!("Starting ClawShield v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        database = %config.database.url,
        upstream = %config.upstream.http_url,
        "Configuration loaded"
    );

    error::set_debug_errors(config.server.debug_errors);
    if config.server.debug_errors {
        tracing::warn!("Debug error bodies are enabled - disable for production");
    }

    // Connect to database
    let pool = SqlitePool::connect(&config.database.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            anyhow::anyhow!("Database connection error: {}", e)
        })?;

    // Initialize repository and schema
    let repository = GatewayRepository::new(pool);
    repository.init_schema().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize database schema");
        anyhow::anyhow!("Schema initialization error: {}", e)
    })?;

    tracing::info!("Database connected and schema initialized");

    // Volatile firewall state
    let kv = Arc::new(MemoryKv::new());

    // Alert fan-out for critical threats
    let alert_handler: Option<Arc<dyn AlertHandler>> = match &config.alerts.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Alert webhook enabled");
            Some(Arc::new(WebhookAlertHandler::new(url.clone())))
        }
        None => {
            tracing::info!("Alert webhook disabled");
            None
        }
    };

    // Firewall pipeline
    let orchestrator = Arc::new(FirewallOrchestrator::new(
        repository.clone(),
        kv,
        OrchestratorConfig::from(&config.firewall),
        alert_handler,
    ));

    // Skill analysis pipeline
    let dynamic = DynamicCodeAnalyzer::new(config.analyzer.memory_limit_bytes);
    let analyzer = Arc::new(SkillAnalyzer::new(
        dynamic,
        Duration::from_millis(config.analyzer.default_timeout_ms),
    ));

    // Build application state
    let state = AppState {
        orchestrator,
        analyzer,
        repository,
        scrubber: Arc::new(ResponseScrubber::new()),
        http_client: reqwest::Client::new(),
        upstream: config.upstream.clone(),
        ws_limiter: Arc::new(WsConnectionTracker::new(
            config.firewall.max_ws_connections_per_ip,
        )),
    };

    // Build router
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(address = %addr, "Gateway listening");
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
