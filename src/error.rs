//! Error types for whatsapp-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account id {0} already belongs to a different user/phone pair")]
    AccountCollision(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Failure of a single call to the bridge process.
///
/// Every bridge call returns this explicitly; callers decide whether to
/// simulate, fall back to mock data, or report the reason.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bridge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("bridge returned an unexpected payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, Error>;
