//! WebSocket proxy surface.
//!
//! Each accepted client connection owns exactly one upstream connection.
//! Inbound frames are inspected inline: the next frame is not read until
//! the current inspection has returned. A denied message produces a framed
//! error without closing the socket; the per-IP connection cap is the only
//! policy condition that refuses a connection outright.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

use crate::domain::AgentContext;
use crate::proxy::http::{agent_id_from_headers, client_ip};
use crate::AppState;

/// In-process per-IP connection accounting.
pub struct WsConnectionTracker {
    max_per_ip: usize,
    counts: RwLock<HashMap<String, usize>>,
}

impl WsConnectionTracker {
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            max_per_ip,
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Try to take a connection slot for an IP.
    pub async fn acquire(&self, ip: &str) -> bool {
        let mut counts = self.counts.write().await;
        let count = counts.entry(ip.to_string()).or_insert(0);
        if *count >= self.max_per_ip {
            return false;
        }
        *count += 1;
        true
    }

    /// Return a slot on socket close.
    pub async fn release(&self, ip: &str) {
        let mut counts = self.counts.write().await;
        if let Some(count) = counts.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(ip);
            }
        }
    }

    pub async fn active(&self, ip: &str) -> usize {
        *self.counts.read().await.get(ip).unwrap_or(&0)
    }
}

/// Upgrade handler for `/ws`.
pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, peer);

    let Some(agent_id) = agent_id_from_headers(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Missing agent identifier header"})),
        )
            .into_response();
    };

    if !state.ws_limiter.acquire(&ip).await {
        tracing::warn!(ip = %ip, "WebSocket connection limit reached");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "Too many concurrent connections"})),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| async move {
        handle_connection(socket, state.clone(), agent_id.clone(), ip.clone()).await;
        state.ws_limiter.release(&ip).await;
        state.orchestrator.unregister_agent(&agent_id).await;
        tracing::info!(agent_id = %agent_id, ip = %ip, "WebSocket connection closed");
    })
}

async fn handle_connection(socket: WebSocket, state: AppState, agent_id: String, ip: String) {
    state
        .orchestrator
        .register_agent(&agent_id, AgentContext::new(agent_id.clone()).with_peer(ip.clone()))
        .await;

    let upstream = match connect_async(state.upstream.ws_url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Upstream WebSocket connect failed");
            let mut socket = socket;
            let frame = serde_json::json!({
                "type": "error",
                "error": "Upstream unavailable",
                "reason": "Could not reach the downstream host",
            });
            let _ = socket.send(Message::Text(frame.to_string().into())).await;
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = socket.split();

    tracing::info!(agent_id = %agent_id, "WebSocket session established");

    loop {
        tokio::select! {
            inbound = client_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        // Inline inspection: the next frame is not read
                        // until this returns.
                        let result = state
                            .orchestrator
                            .inspect_message(&agent_id, text.as_str())
                            .await;

                        if result.allowed {
                            if upstream_tx
                                .send(UpstreamMessage::Text(text.as_str().to_string()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            // One deny is not a disconnect.
                            let frame = serde_json::json!({
                                "type": "error",
                                "error": "Message blocked by firewall",
                                "reason": result.reason,
                            });
                            if client_tx
                                .send(Message::Text(frame.to_string().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary, ping, and pong frames are not forwarded.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Client socket error");
                        break;
                    }
                }
            }
            outbound = upstream_rx.next() => {
                match outbound {
                    Some(Ok(UpstreamMessage::Text(text))) => {
                        if client_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Binary(bytes))) => {
                        if client_tx.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Upstream socket error");
                        break;
                    }
                }
            }
        }
    }
}
