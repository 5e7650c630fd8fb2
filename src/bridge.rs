//! HTTP client for the local WhatsApp bridge process
//!
//! One attempt per call with a bounded timeout. Failures come back as
//! [`BridgeError`] and never escape as panics; retrying is the caller's business.

use crate::config::{BridgeTimeouts, Config};
use crate::error::BridgeError;
use crate::message::InboundMessage;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Client bound to a single bridge base URL
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base_url: String,
    http: reqwest::Client,
    timeouts: BridgeTimeouts,
}

impl BridgeClient {
    pub fn new(base_url: &str, timeouts: BridgeTimeouts) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeouts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.bridge_url, config.timeouts)
    }

    /// Client for another bridge sharing this one's connection pool
    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: self.http.clone(),
            timeouts: self.timeouts,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /status` - raw bridge payload
    pub async fn status(&self) -> BridgeResult<Value> {
        self.status_with_timeout(self.timeouts.status).await
    }

    /// Short reachability check used before each automation cycle
    pub async fn is_reachable(&self) -> bool {
        match self.status_with_timeout(self.timeouts.reachability).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Bridge status check at {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    async fn status_with_timeout(&self, timeout: Duration) -> BridgeResult<Value> {
        let req = self.http.get(self.url("/status")).timeout(timeout);
        execute(req).await
    }

    /// `GET /messages?limit=` - raw bridge payload
    pub async fn messages_raw(&self, limit: usize, phone: Option<&str>) -> BridgeResult<Value> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(phone) = phone {
            query.push(("phone", phone.to_string()));
        }

        let req = self
            .http
            .get(self.url("/messages"))
            .query(&query)
            .timeout(self.timeouts.messages);
        execute(req).await
    }

    /// `GET /messages` parsed into messages; unparseable entries are skipped
    pub async fn messages(
        &self,
        limit: usize,
        phone: Option<&str>,
    ) -> BridgeResult<Vec<InboundMessage>> {
        let payload = self.messages_raw(limit, phone).await?;
        parse_messages(payload)
    }

    /// `POST /send {to, message}` - raw bridge payload
    pub async fn send(&self, to: &str, message: &str) -> BridgeResult<Value> {
        let req = self
            .http
            .post(self.url("/send"))
            .json(&json!({ "to": to, "message": message }))
            .timeout(self.timeouts.send);
        execute(req).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn execute(req: RequestBuilder) -> BridgeResult<Value> {
    let resp = req.send().await?;
    read_json(resp).await
}

async fn read_json(resp: Response) -> BridgeResult<Value> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(BridgeError::Status {
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| BridgeError::InvalidPayload(e.to_string()))
}

/// Accepts `{"messages": [...]}` or a bare array
pub fn parse_messages(payload: Value) -> BridgeResult<Vec<InboundMessage>> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("messages") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(BridgeError::InvalidPayload(format!(
                    "messages is not an array: {}",
                    other
                )))
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(BridgeError::InvalidPayload(format!(
                "unexpected messages payload: {}",
                other
            )))
        }
    };

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<InboundMessage>(item) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!("Skipping malformed bridge message: {}", e),
        }
    }
    Ok(messages)
}
