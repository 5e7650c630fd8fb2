//! Message types exchanged with callers and the bridge

use crate::error::{Error, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A message sent through the facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /send` before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SendRequest {
    /// Validate required fields and stamp the send time if the caller didn't
    pub fn into_message(self) -> Result<OutgoingMessage> {
        let to = required(self.to, "to")?;
        let message = required(self.message, "message")?;
        Ok(OutgoingMessage {
            to,
            message,
            account_id: self.account_id.filter(|id| !id.trim().is_empty()),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::MissingParameter(name.to_string())),
    }
}

/// Whether a bridge message was received or sent by us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
    #[serde(other)]
    Other,
}

/// A message as reported by the bridge's `/messages` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// ISO string or epoch number, depending on the bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(rename = "isNew", default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
    /// Bridge fields we don't interpret, kept for reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundMessage {
    pub fn is_inbound(&self) -> bool {
        self.direction == Some(Direction::Received)
    }

    /// Synthetic message used when the bridge can't be reached
    pub fn mock(phone: Option<&str>) -> Self {
        let now = Local::now();
        Self {
            id: Some(format!("msg_{}", now.format("%Y%m%d_%H%M%S"))),
            phone: phone.map(str::to_string),
            text: Some(MOCK_MESSAGE_TEXT.to_string()),
            timestamp: Some(Value::String(now.to_rfc3339())),
            direction: Some(Direction::Received),
            is_new: Some(true),
            extra: Map::new(),
        }
    }
}

/// Strings pass through, numbers become their decimal text, anything else is absent
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub const MOCK_MESSAGE_TEXT: &str = "Wann fängst du mit der Arbeit an?";
