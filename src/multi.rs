//! Multi-account facade - routes each request to the account's own bridge

use crate::accounts::{AccountInfo, AccountRegistry, AccountStatus, BridgeSupervisor};
use crate::api::{send_body, ApiResult};
use crate::bridge::BridgeClient;
use crate::config::{Config, DEFAULT_MESSAGE_LIMIT};
use crate::error::{Error, Result};
use crate::message::{OutgoingMessage, SendRequest};
use crate::relay::SendOutcome;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Header carrying the target account id
pub const ACCOUNT_HEADER: &str = "x-account-id";

pub struct MultiState {
    registry: Mutex<AccountRegistry>,
    supervisor: Mutex<BridgeSupervisor>,
    bridge: BridgeClient,
}

impl MultiState {
    pub fn new(registry: AccountRegistry, supervisor: BridgeSupervisor, bridge: BridgeClient) -> Self {
        Self {
            registry: Mutex::new(registry),
            supervisor: Mutex::new(supervisor),
            bridge,
        }
    }

    /// Persistent registry loaded from disk plus the configured launcher
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = AccountRegistry::persistent(config);
        let count = registry.load()?;
        info!("Loaded {} accounts from registry", count);

        Ok(Self::new(
            registry,
            BridgeSupervisor::from_config(config),
            BridgeClient::from_config(config),
        ))
    }

    /// Register the account and start its bridge on first creation
    pub async fn create_account(
        &self,
        user_id: &str,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<AccountInfo> {
        let mut registry = self.registry.lock().await;
        let (mut account, created) = registry.create_account(user_id, phone_number, display_name)?;

        if created {
            info!(
                "Created account {} on bridge port {}",
                account.account_id, account.bridge_port
            );
            let status = self.supervisor.lock().await.start(&account);
            registry.set_status(&account.account_id, status)?;
            account.status = status;
            // the entry stays registered in memory; the next save persists it
            if let Err(e) = registry.save() {
                warn!("Failed to save account registry: {}", e);
            }
        }

        Ok(account)
    }

    pub async fn list_accounts(&self) -> Vec<AccountInfo> {
        self.registry.lock().await.list()
    }

    pub async fn account_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    async fn bridge_for(&self, account_id: &str) -> Result<BridgeClient> {
        let url = self.registry.lock().await.get_bridge_url(account_id)?;
        Ok(self.bridge.with_base_url(&url))
    }

    /// Query the account's bridge and record whether it is connected
    pub async fn account_status(&self, account_id: &str) -> Result<Value> {
        let bridge = self.bridge_for(account_id).await?;

        let (status, body) = match bridge.status().await {
            Ok(payload) => {
                let connected = payload.get("connected").and_then(Value::as_bool) == Some(true);
                let status = if connected {
                    AccountStatus::Connected
                } else {
                    AccountStatus::Disconnected
                };
                let body = json!({
                    "account_id": account_id,
                    "bridge_online": true,
                    "status": payload,
                });
                (status, body)
            }
            Err(e) => {
                warn!("Bridge for account {} unreachable: {}", account_id, e);
                let body = json!({
                    "account_id": account_id,
                    "bridge_online": false,
                    "error": e.to_string(),
                });
                (AccountStatus::Disconnected, body)
            }
        };

        let mut registry = self.registry.lock().await;
        if registry.get(account_id).map(|a| a.status) != Some(status) {
            registry.set_status(account_id, status)?;
            if let Err(e) = registry.save() {
                warn!("Failed to save account registry: {}", e);
            }
        }

        Ok(body)
    }

    pub async fn send(&self, account_id: &str, message: OutgoingMessage) -> Result<SendOutcome> {
        let bridge = self.bridge_for(account_id).await?;

        let outcome = match bridge.send(&message.to, &message.message).await {
            Ok(bridge_response) => {
                info!("Message to {} sent via account {}", message.to, account_id);
                SendOutcome::Sent {
                    message,
                    bridge_response,
                }
            }
            Err(e) => {
                warn!("Send via account {} failed: {}", account_id, e);
                SendOutcome::Error {
                    message,
                    error: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    pub async fn messages(&self, account_id: &str, limit: usize) -> Result<Value> {
        let bridge = self.bridge_for(account_id).await?;

        let body = match bridge.messages_raw(limit, None).await {
            Ok(payload) => {
                let messages = match payload {
                    Value::Array(_) => payload,
                    Value::Object(mut obj) => obj.remove("messages").unwrap_or_else(|| json!([])),
                    _ => json!([]),
                };
                json!({ "account_id": account_id, "messages": messages })
            }
            Err(e) => {
                warn!("Fetching messages for account {} failed: {}", account_id, e);
                json!({
                    "account_id": account_id,
                    "status": "error",
                    "error": e.to_string(),
                    "messages": [],
                })
            }
        };
        Ok(body)
    }

    /// Stop every bridge process this service launched
    pub async fn shutdown(&self) {
        self.supervisor.lock().await.shutdown().await;
    }
}

/// Account id from the header, falling back to a request field
pub fn resolve_account_id(headers: &HeaderMap, fallback: Option<&str>) -> Result<String> {
    let from_header = headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    from_header
        .or_else(|| fallback.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| {
            Error::MissingParameter("account_id (X-Account-Id header or body field)".to_string())
        })
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountQuery {
    pub user_id: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub account_id: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_MESSAGE_LIMIT
}

pub fn router(state: Arc<MultiState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:account_id/status", get(account_status))
        .route("/send", post(send_message))
        .route("/messages", get(get_messages))
        .with_state(state)
}

async fn root(State(state): State<Arc<MultiState>>) -> Json<Value> {
    Json(json!({
        "service": "Multi-account WhatsApp relay",
        "version": env!("CARGO_PKG_VERSION"),
        "accounts": state.account_count().await,
        "features": [
            "Multiple WhatsApp accounts per server",
            "Individual QR codes per account",
            "Account-based message routing",
            "Isolated auth sessions"
        ],
    }))
}

async fn create_account(
    State(state): State<Arc<MultiState>>,
    Query(query): Query<CreateAccountQuery>,
) -> ApiResult<Json<Value>> {
    let user_id = query
        .user_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::MissingParameter("user_id".to_string()))?;
    let phone_number = query
        .phone_number
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::MissingParameter("phone_number".to_string()))?;

    let account = state
        .create_account(&user_id, &phone_number, query.display_name.as_deref())
        .await?;
    let bridge_url = state.bridge_for(&account.account_id).await?;

    Ok(Json(json!({
        "account_id": account.account_id,
        "bridge_port": account.bridge_port,
        "status": account.status,
        "qr_code_url": format!("{}/qr", bridge_url.base_url()),
        "message": "Scan the QR code with WhatsApp to connect this account",
    })))
}

async fn list_accounts(State(state): State<Arc<MultiState>>) -> Json<Vec<AccountInfo>> {
    Json(state.list_accounts().await)
}

async fn account_status(
    State(state): State<Arc<MultiState>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.account_status(&account_id).await?))
}

async fn send_message(
    State(state): State<Arc<MultiState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = send_body(body)?;
    let account_id = resolve_account_id(&headers, req.account_id.as_deref())?;

    let mut message = req.into_message()?;
    message.account_id = Some(account_id.clone());

    let outcome = state.send(&account_id, message).await?;
    let mut body = serde_json::to_value(&outcome).map_err(Error::from)?;
    body["account_id"] = json!(account_id);
    Ok(Json(body))
}

async fn get_messages(
    State(state): State<Arc<MultiState>>,
    headers: HeaderMap,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Value>> {
    let account_id = resolve_account_id(&headers, query.account_id.as_deref())?;
    Ok(Json(state.messages(&account_id, query.limit).await?))
}
