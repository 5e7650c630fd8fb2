//! Automation config and run state - JSON files merged over defaults
//!
//! Neither file is locked; two processes sharing a state file will race.

use crate::config::PROCESSED_WINDOW;
use crate::error::{Error, Result};
use crate::rules::{CategoryRule, ResponseRules};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub const DEFAULT_REPLY_MESSAGE: &str = "ich mich demnächst an die arbeit mache :)";

/// Auto-reply rules and polling thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub auto_reply_enabled: bool,
    pub auto_reply_keywords: Vec<String>,
    pub auto_reply_message: String,
    /// Seconds between cycles
    pub message_check_interval: u64,
    pub max_messages_per_check: usize,
    pub intelligent_responses: ResponseRules,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_reply_enabled: true,
            auto_reply_keywords: ["arbeit", "work", "job", "projekt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            auto_reply_message: DEFAULT_REPLY_MESSAGE.to_string(),
            message_check_interval: 300,
            max_messages_per_check: 30,
            intelligent_responses: ResponseRules::new(vec![
                CategoryRule::new(
                    "greeting",
                    &["hallo", "hi", "hey"],
                    "Hallo! Danke für deine Nachricht.",
                ),
                CategoryRule::new(
                    "work_inquiry",
                    &["arbeit", "work", "projekt"],
                    DEFAULT_REPLY_MESSAGE,
                ),
                CategoryRule::new(
                    "time_inquiry",
                    &["wann", "when", "zeit"],
                    "Ich melde mich bald mit Details!",
                ),
            ]),
        }
    }
}

impl AutomationConfig {
    /// Load from `path`, falling back to defaults on any problem
    pub fn load(path: &Path) -> Self {
        load_or_default(path, "automation config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Progress of the automation loop across runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationState {
    pub last_message_id: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
    /// Trailing window of handled ids, oldest first
    pub processed_messages: Vec<String>,
    pub auto_replies_sent: u64,
    pub total_messages_processed: u64,
}

impl AutomationState {
    pub fn load(path: &Path) -> Self {
        load_or_default(path, "automation state")
    }

    /// Stamp `last_check_time` and write atomically
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_check_time = Some(Utc::now());
        write_json_atomic(path, self)
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed_messages.iter().any(|p| p == id)
    }

    /// Append `id` and evict the oldest entries beyond the window
    pub fn record_processed(&mut self, id: &str) {
        self.processed_messages.push(id.to_string());
        self.last_message_id = Some(id.to_string());
        self.total_messages_processed += 1;

        if self.processed_messages.len() > PROCESSED_WINDOW {
            let excess = self.processed_messages.len() - PROCESSED_WINDOW;
            self.processed_messages.drain(..excess);
        }
    }
}

/// Read a JSON object and overlay its top-level keys onto `T::default()`.
///
/// A missing file is normal. An unreadable or malformed file is logged and
/// yields defaults; a single key with the wrong shape is logged and skipped
/// while the other keys still apply.
fn load_or_default<T>(path: &Path, what: &str) -> T
where
    T: Serialize + DeserializeOwned + Default,
{
    if !path.exists() {
        return T::default();
    }

    let parsed = fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|content| serde_json::from_str::<Value>(&content).map_err(Error::from));

    let overrides = match parsed {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                "Ignoring {} in {}: expected a JSON object, found {}",
                what,
                path.display(),
                other
            );
            return T::default();
        }
        Err(e) => {
            warn!("Failed to load {} from {}: {}", what, path.display(), e);
            return T::default();
        }
    };

    let mut merged = match serde_json::to_value(T::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    for (key, value) in overrides {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), value);
        match serde_json::from_value::<T>(Value::Object(candidate.clone())) {
            Ok(_) => merged = candidate,
            Err(e) => warn!(
                "Ignoring {} key '{}' in {}: {}",
                what,
                key,
                path.display(),
                e
            ),
        }
    }

    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
        warn!("Failed to merge {} from {}: {}", what, path.display(), e);
        T::default()
    })
}

/// Save JSON to disk atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    // Ensure parent directory exists
    let parent = path.parent().unwrap_or(Path::new("."));
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::create_dir_all(parent)?;

    // Write to temp file in same directory (for atomic rename)
    let mut temp = NamedTempFile::new_in(parent)?;

    let json = serde_json::to_string_pretty(value)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = AutomationConfig::load(&temp_dir.path().join("nope.json"));
        assert_eq!(config, AutomationConfig::default());
        assert_eq!(config.intelligent_responses.len(), 3);
    }

    #[test]
    fn test_config_partial_merge() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"auto_reply_keywords": ["arbeit"], "auto_reply_message": "busy"}"#,
        )
        .unwrap();

        let config = AutomationConfig::load(&path);
        assert_eq!(config.auto_reply_keywords, vec!["arbeit"]);
        assert_eq!(config.auto_reply_message, "busy");
        // untouched keys keep their defaults
        assert_eq!(config.message_check_interval, 300);
        assert_eq!(config.max_messages_per_check, 30);
        assert!(config.auto_reply_enabled);
    }

    #[test]
    fn test_config_malformed_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AutomationConfig::load(&path);
        assert_eq!(config, AutomationConfig::default());
    }

    #[test]
    fn test_config_bad_key_keeps_other_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"auto_reply_enabled": false, "message_check_interval": 60.5, "auto_reply_message": "busy"}"#,
        )
        .unwrap();

        let config = AutomationConfig::load(&path);
        assert!(!config.auto_reply_enabled);
        assert_eq!(config.auto_reply_message, "busy");
        // wrong type, default kept
        assert_eq!(config.message_check_interval, 300);
    }

    #[test]
    fn test_config_merge_keeps_rule_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        fs::write(&path, r#"{"auto_reply_message": "busy"}"#).unwrap();
        let config = AutomationConfig::load(&path);
        let names: Vec<_> = config.intelligent_responses.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["greeting", "work_inquiry", "time_inquiry"]);

        fs::write(
            &path,
            r#"{"intelligent_responses": {"zeta": ["z", "Z"], "alpha": ["a", "A"]}}"#,
        )
        .unwrap();
        let config = AutomationConfig::load(&path);
        let names: Vec<_> = config.intelligent_responses.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_config_non_object_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(AutomationConfig::load(&path), AutomationConfig::default());
    }

    #[test]
    fn test_state_bad_counter_keeps_window() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"processed_messages": ["m1", "m2"], "auto_replies_sent": "many"}"#,
        )
        .unwrap();

        let state = AutomationState::load(&path);
        assert_eq!(state.processed_messages, vec!["m1", "m2"]);
        assert_eq!(state.auto_replies_sent, 0);
    }

    #[test]
    fn test_config_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.json");
        let mut config = AutomationConfig::default();
        config.message_check_interval = 42;
        config.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // written as UTF-8, not \u escapes
        assert!(content.contains("demnächst"));

        let reloaded = AutomationConfig::load(&path);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_state_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let mut state = AutomationState::default();
        state.record_processed("m1");
        state.auto_replies_sent = 1;
        state.save(&path).unwrap();
        assert!(state.last_check_time.is_some());

        let loaded = AutomationState::load(&path);
        assert_eq!(loaded.processed_messages, vec!["m1"]);
        assert_eq!(loaded.last_message_id.as_deref(), Some("m1"));
        assert_eq!(loaded.total_messages_processed, 1);
        assert_eq!(loaded.auto_replies_sent, 1);
    }

    #[test]
    fn test_state_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, r#"{"auto_replies_sent": 7}"#).unwrap();

        let state = AutomationState::load(&path);
        assert_eq!(state.auto_replies_sent, 7);
        assert!(state.processed_messages.is_empty());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut state = AutomationState::default();
        for i in 0..=PROCESSED_WINDOW {
            state.record_processed(&format!("m{}", i));
        }
        assert_eq!(state.processed_messages.len(), PROCESSED_WINDOW);
        assert!(!state.is_processed("m0"));
        assert!(state.is_processed("m1"));
        assert!(state.is_processed(&format!("m{}", PROCESSED_WINDOW)));
        assert_eq!(state.total_messages_processed, PROCESSED_WINDOW as u64 + 1);
    }

    proptest! {
        #[test]
        fn prop_window_keeps_last_ids(count in 1usize..300) {
            let mut state = AutomationState::default();
            for i in 0..count {
                state.record_processed(&format!("id-{}", i));
            }

            prop_assert!(state.processed_messages.len() <= PROCESSED_WINDOW);
            let first_kept = count.saturating_sub(PROCESSED_WINDOW);
            for i in 0..count {
                prop_assert_eq!(state.is_processed(&format!("id-{}", i)), i >= first_kept);
            }
        }
    }
}
