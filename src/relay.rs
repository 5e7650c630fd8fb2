//! Single-account relay facade
//!
//! Forwards `send`/`messages`/`bridge_status` to the bridge, or simulates them
//! in memory when the bridge is offline. Bridge failures are reported in the
//! response body; only malformed requests produce non-200 responses.

use crate::api::{send_body, ApiResult};
use crate::bridge::BridgeClient;
use crate::config::{BridgeMode, Config, DEFAULT_MESSAGE_LIMIT};
use crate::message::{OutgoingMessage, SendRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of a send, tagged by `status`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SendOutcome {
    Sent {
        message: OutgoingMessage,
        bridge_response: Value,
    },
    Error {
        message: OutgoingMessage,
        error: String,
    },
    Simulated {
        detail: String,
        message: OutgoingMessage,
    },
}

impl SendOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            SendOutcome::Sent { .. } => "sent",
            SendOutcome::Error { .. } => "error",
            SendOutcome::Simulated { .. } => "simulated",
        }
    }
}

/// Facade state owned by the server instance
pub struct RelayState {
    bridge: BridgeClient,
    mode: BridgeMode,
    simulated: Mutex<Vec<OutgoingMessage>>,
}

impl RelayState {
    pub fn new(config: &Config) -> Self {
        Self::with_bridge(BridgeClient::from_config(config), config.bridge_mode)
    }

    pub fn with_bridge(bridge: BridgeClient, mode: BridgeMode) -> Self {
        Self {
            bridge,
            mode,
            simulated: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    async fn bridge_available(&self) -> bool {
        match self.mode {
            BridgeMode::Online => true,
            BridgeMode::Offline => false,
            BridgeMode::Auto => self.bridge.is_reachable().await,
        }
    }

    /// Forward to the bridge, or record in the simulated log when it is down
    pub async fn send(&self, message: OutgoingMessage) -> SendOutcome {
        if !self.bridge_available().await {
            info!("Bridge offline, simulating message to {}", message.to);
            self.simulated.lock().await.push(message.clone());
            return SendOutcome::Simulated {
                detail: "Bridge offline, message simulated".to_string(),
                message,
            };
        }

        match self.bridge.send(&message.to, &message.message).await {
            Ok(bridge_response) => {
                info!("Message to {} forwarded to bridge", message.to);
                SendOutcome::Sent {
                    message,
                    bridge_response,
                }
            }
            Err(e) => {
                warn!("Bridge send to {} failed: {}", message.to, e);
                SendOutcome::Error {
                    message,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Last `limit` simulated messages, oldest first
    pub async fn simulated_messages(&self, limit: usize) -> Vec<OutgoingMessage> {
        let log = self.simulated.lock().await;
        let start = log.len().saturating_sub(limit);
        log[start..].to_vec()
    }

    pub async fn simulated_count(&self) -> usize {
        self.simulated.lock().await.len()
    }

    /// Messages from whichever store is authoritative right now
    pub async fn messages(&self, limit: usize) -> Value {
        if !self.bridge_available().await {
            return json!(self.simulated_messages(limit).await);
        }

        match self.bridge.messages_raw(limit, None).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Bridge messages fetch failed: {}", e);
                json!({ "status": "error", "error": e.to_string() })
            }
        }
    }

    pub async fn bridge_status(&self) -> Value {
        if self.mode == BridgeMode::Offline {
            return json!({ "bridge_online": false, "simulation_mode": true });
        }

        match self.bridge.status().await {
            Ok(status) => json!({ "bridge_online": true, "status": status }),
            Err(e) => {
                warn!("Bridge status check failed: {}", e);
                json!({
                    "bridge_online": false,
                    "error": "Bridge unreachable",
                    "reason": e.to_string(),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_MESSAGE_LIMIT
}

/// Routes: `POST /send`, `GET /messages`, `GET /bridge_status`, `GET /`
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/send", post(send_message))
        .route("/messages", get(get_messages))
        .route("/bridge_status", get(bridge_status))
        .with_state(state)
}

async fn root(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(json!({
        "service": "WhatsApp relay",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.mode().to_string(),
        "simulated_messages": state.simulated_count().await,
    }))
}

async fn send_message(
    State(state): State<Arc<RelayState>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<SendOutcome>> {
    let message = send_body(body)?.into_message()?;
    Ok(Json(state.send(message).await))
}

async fn get_messages(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    Json(state.messages(query.limit).await)
}

async fn bridge_status(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(state.bridge_status().await)
}
