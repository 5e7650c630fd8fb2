//! Account registry - maps hashed account ids to dedicated bridge ports
//!
//! Account ids are the first 8 hex chars of SHA-256(`user_id` + `_` + `phone`).
//! That prefix can collide, so every entry remembers its owner and a second
//! owner hashing to the same id is rejected rather than aliased.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::write_json_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

const ACCOUNT_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Created,
    Starting,
    Connected,
    Disconnected,
}

/// One registered WhatsApp account and its bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub user_id: String,
    pub phone_number: String,
    pub display_name: Option<String>,
    pub bridge_port: u16,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// Deterministic account id for a (user, phone) pair
pub fn derive_account_id(user_id: &str, phone_number: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}", user_id, phone_number).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..ACCOUNT_ID_LEN].to_string()
}

/// Registry of accounts, optionally persisted to JSON
pub struct AccountRegistry {
    path: Option<PathBuf>,
    bridge_host: String,
    base_port: u16,
    next_port: u16,
    accounts: HashMap<String, AccountInfo>,
}

impl AccountRegistry {
    /// In-memory registry handing out ports from `base_port`
    pub fn new(bridge_host: &str, base_port: u16) -> Self {
        Self {
            path: None,
            bridge_host: bridge_host.to_string(),
            base_port,
            next_port: base_port,
            accounts: HashMap::new(),
        }
    }

    /// Registry backed by `config.accounts_file`
    pub fn persistent(config: &Config) -> Self {
        let mut registry = Self::new(&config.bridge_host, config.bridge_base_port);
        registry.path = Some(config.accounts_file.clone());
        registry
    }

    /// Load accounts from disk; port assignment resumes after the highest one.
    ///
    /// An unreadable or malformed file is logged, moved aside to
    /// `<name>.corrupt`, and the registry starts empty.
    pub fn load(&mut self) -> Result<usize> {
        let path = match &self.path {
            Some(p) if p.exists() => p.clone(),
            _ => return Ok(0),
        };

        let parsed = fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|content| {
                serde_json::from_str::<Vec<AccountInfo>>(&content).map_err(Error::from)
            });

        let list = match parsed {
            Ok(list) => list,
            Err(e) => {
                warn!("Failed to load accounts from {}: {}", path.display(), e);
                let mut aside = path.clone().into_os_string();
                aside.push(".corrupt");
                match fs::rename(&path, &aside) {
                    Ok(()) => warn!("Moved unreadable registry to {:?}", aside),
                    Err(e) => warn!("Failed to move {} aside: {}", path.display(), e),
                }
                Vec::new()
            }
        };

        self.accounts = list
            .into_iter()
            .map(|a| (a.account_id.clone(), a))
            .collect();
        self.next_port = self
            .accounts
            .values()
            .map(|a| a.bridge_port.saturating_add(1))
            .max()
            .unwrap_or(self.base_port)
            .max(self.base_port);

        Ok(self.accounts.len())
    }

    /// Save registry to disk (no-op for in-memory registries)
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, &self.list()),
            None => Ok(()),
        }
    }

    /// Register an account, or return the existing one for the same inputs.
    ///
    /// The flag is true when a new entry was created.
    pub fn create_account(
        &mut self,
        user_id: &str,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<(AccountInfo, bool)> {
        let account_id = derive_account_id(user_id, phone_number);

        if let Some(existing) = self.accounts.get(&account_id) {
            if existing.user_id != user_id || existing.phone_number != phone_number {
                return Err(Error::AccountCollision(account_id));
            }
            return Ok((existing.clone(), false));
        }

        let bridge_port = self.next_port;
        self.next_port = bridge_port
            .checked_add(1)
            .ok_or_else(|| Error::Config("bridge port range exhausted".to_string()))?;

        let info = AccountInfo {
            display_name: Some(
                display_name
                    .filter(|n| !n.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("User_{}", account_id)),
            ),
            account_id: account_id.clone(),
            user_id: user_id.to_string(),
            phone_number: phone_number.to_string(),
            bridge_port,
            status: AccountStatus::Created,
            created_at: Utc::now(),
        };

        self.accounts.insert(account_id, info.clone());
        Ok((info, true))
    }

    pub fn get(&self, account_id: &str) -> Option<&AccountInfo> {
        self.accounts.get(account_id)
    }

    pub fn get_bridge_url(&self, account_id: &str) -> Result<String> {
        let account = self
            .get(account_id)
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;
        Ok(format!("http://{}:{}", self.bridge_host, account.bridge_port))
    }

    pub fn set_status(&mut self, account_id: &str, status: AccountStatus) -> Result<()> {
        let account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;
        account.status = status;
        Ok(())
    }

    /// All accounts ordered by bridge port (creation order)
    pub fn list(&self) -> Vec<AccountInfo> {
        let mut list: Vec<_> = self.accounts.values().cloned().collect();
        list.sort_by_key(|a| a.bridge_port);
        list
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Starts one bridge process per account when a launcher is configured.
///
/// Without a launcher the start step only logs and marks the account
/// `starting`; something outside this process must bring the bridge up.
/// Children are killed when the supervisor is dropped. There is no restart
/// policy.
pub struct BridgeSupervisor {
    command: Option<PathBuf>,
    auth_root: PathBuf,
    children: HashMap<String, Child>,
}

impl BridgeSupervisor {
    pub fn new(command: Option<PathBuf>, auth_root: PathBuf) -> Self {
        Self {
            command,
            auth_root,
            children: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.bridge_command.clone(), config.data_dir.clone())
    }

    /// Directory holding the bridge's session credentials for an account
    pub fn auth_dir(&self, account_id: &str) -> PathBuf {
        self.auth_root.join(format!("auth_info_{}", account_id))
    }

    /// Launch the account's bridge; returns the status the account should take
    pub fn start(&mut self, account: &AccountInfo) -> AccountStatus {
        let command = match &self.command {
            Some(c) => c.clone(),
            None => {
                info!(
                    "No bridge launcher configured; expecting bridge for account {} on port {}",
                    account.account_id, account.bridge_port
                );
                return AccountStatus::Starting;
            }
        };

        let auth_dir = self.auth_dir(&account.account_id);
        if let Err(e) = fs::create_dir_all(&auth_dir) {
            warn!("Failed to create {}: {}", auth_dir.display(), e);
        }

        let spawned = Command::new(&command)
            .env("PORT", account.bridge_port.to_string())
            .env("AUTH_DIR", &auth_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                info!(
                    "Bridge for account {} started on port {} (pid {:?})",
                    account.account_id,
                    account.bridge_port,
                    child.id()
                );
                self.children.insert(account.account_id.clone(), child);
                AccountStatus::Starting
            }
            Err(e) => {
                error!(
                    "Failed to start bridge {} for account {}: {}",
                    command.display(),
                    account.account_id,
                    e
                );
                AccountStatus::Created
            }
        }
    }

    /// Whether a bridge we spawned is still alive
    pub fn is_running(&mut self, account_id: &str) -> bool {
        match self.children.get_mut(account_id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn managed_count(&self) -> usize {
        self.children.len()
    }

    /// Kill every bridge this supervisor started
    pub async fn shutdown(&mut self) {
        for (account_id, mut child) in self.children.drain() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop bridge for {}: {}", account_id, e);
            }
        }
    }
}
