//! Configuration and paths

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How the single-account facade treats the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Always forward to the bridge
    Online,
    /// Never contact the bridge, simulate everything
    Offline,
    /// Check the bridge per request and simulate when it is down
    Auto,
}

impl FromStr for BridgeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "online" => Ok(BridgeMode::Online),
            "false" | "0" | "offline" | "" => Ok(BridgeMode::Offline),
            "auto" => Ok(BridgeMode::Auto),
            other => Err(Error::Config(format!("invalid BRIDGE_ONLINE value: {}", other))),
        }
    }
}

impl std::fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeMode::Online => write!(f, "online"),
            BridgeMode::Offline => write!(f, "simulation"),
            BridgeMode::Auto => write!(f, "auto"),
        }
    }
}

/// Per-operation timeouts for bridge calls
#[derive(Debug, Clone, Copy)]
pub struct BridgeTimeouts {
    pub reachability: Duration,
    pub status: Duration,
    pub messages: Duration,
    pub send: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            reachability: Duration::from_secs(5),
            status: Duration::from_secs(10),
            messages: Duration::from_secs(10),
            send: Duration::from_secs(30),
        }
    }
}

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub automation_config_file: PathBuf,
    pub state_file: PathBuf,
    pub accounts_file: PathBuf,
    pub reports_dir: PathBuf,
    pub bridge_url: String,
    pub bridge_mode: BridgeMode,
    pub bridge_host: String,
    pub bridge_base_port: u16,
    pub bridge_command: Option<PathBuf>,
    pub bind_addr: String,
    pub target_phone: Option<String>,
    pub timeouts: BridgeTimeouts,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_data_dir(&home.join(".whatsapp-relay"))
    }
}

impl Config {
    /// Config rooted at `data_dir` with default bridge settings
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            automation_config_file: data_dir.join("automation_config.json"),
            state_file: data_dir.join("automation_state.json"),
            accounts_file: data_dir.join("accounts.json"),
            reports_dir: data_dir.join("reports"),
            data_dir: data_dir.to_path_buf(),
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            bridge_mode: BridgeMode::Offline,
            bridge_host: "localhost".to_string(),
            bridge_base_port: BRIDGE_BASE_PORT,
            bridge_command: None,
            bind_addr: "0.0.0.0:8000".to_string(),
            target_phone: None,
            timeouts: BridgeTimeouts::default(),
        }
    }

    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        let mut config = Self::with_data_dir(temp_dir);
        config.bind_addr = "127.0.0.1:0".to_string();
        config.target_phone = Some("+491700000000".to_string());
        config.timeouts = BridgeTimeouts {
            reachability: Duration::from_secs(2),
            status: Duration::from_secs(2),
            messages: Duration::from_secs(2),
            send: Duration::from_secs(2),
        };
        config
    }

    /// Default config with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("WHATSAPP_RELAY_HOME") {
            Ok(dir) if !dir.is_empty() => Self::with_data_dir(Path::new(&dir)),
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("BRIDGE_URL") {
            config.bridge_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(mode) = std::env::var("BRIDGE_ONLINE") {
            config.bridge_mode = mode.parse()?;
        }
        if let Ok(host) = std::env::var("BRIDGE_HOST") {
            config.bridge_host = host;
        }
        if let Ok(port) = std::env::var("BRIDGE_BASE_PORT") {
            config.bridge_base_port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid BRIDGE_BASE_PORT: {}", port)))?;
        }
        if let Ok(cmd) = std::env::var("BRIDGE_COMMAND") {
            if !cmd.is_empty() {
                config.bridge_command = Some(PathBuf::from(cmd));
            }
        }
        if let Ok(bind) = std::env::var("RELAY_BIND") {
            config.bind_addr = bind;
        }
        if let Ok(phone) = std::env::var("TARGET_PHONE") {
            if !phone.is_empty() {
                config.target_phone = Some(phone);
            }
        }

        Ok(config)
    }

    /// Base URL of the bridge dedicated to a given port
    pub fn bridge_url_for_port(&self, port: u16) -> String {
        format!("http://{}:{}", self.bridge_host, port)
    }
}

pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:3000";

/// First port handed out to per-account bridges
pub const BRIDGE_BASE_PORT: u16 = 3000;

/// Number of processed message ids kept for deduplication
pub const PROCESSED_WINDOW: usize = 100;

/// Default page size for `GET /messages`
pub const DEFAULT_MESSAGE_LIMIT: usize = 30;
