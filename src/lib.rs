//! WhatsApp relay - HTTP facade and auto-reply automation
//!
//! Forwards send/status/message requests to a local WhatsApp bridge process
//! (simulating them when it is offline), routes multiple accounts to their own
//! bridges, and polls for new messages to answer them from a keyword rule table.

pub mod accounts;
pub mod api;
pub mod automation;
pub mod bridge;
pub mod config;
pub mod error;
pub mod message;
pub mod multi;
pub mod relay;
pub mod rules;
pub mod store;
pub mod tools;

pub use error::{Error, Result};
