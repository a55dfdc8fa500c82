//! Alert delivery for critical threats.
//!
//! The orchestrator invokes the configured handler for critical-severity
//! denies only; handler failures are logged and swallowed so alerting can
//! never affect an inspection outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::ThreatType;
use crate::error::{GatewayError, GatewayResult};

/// Payload delivered to the alert sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent_id: Option<String>,
    pub threat_type: ThreatType,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn threat(
        agent_id: Option<String>,
        threat_type: ThreatType,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind: "threat".to_string(),
            agent_id,
            threat_type,
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for critical threat alerts.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn send_alert(&self, alert: &Alert) -> GatewayResult<()>;
}

/// Delivers alerts as JSON POSTs to a webhook.
pub struct WebhookAlertHandler {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertHandler {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertHandler for WebhookAlertHandler {
    async fn send_alert(&self, alert: &Alert) -> GatewayResult<()> {
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(())
    }
}
