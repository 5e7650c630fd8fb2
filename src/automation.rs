//! Polling automation loop
//!
//! Each cycle walks idle -> checking -> processing -> replying -> persisting ->
//! idle. Cycles never overlap, and no fault inside one stops the loop: errors are
//! counted in the cycle result and the next tick runs as scheduled.

use crate::bridge::BridgeClient;
use crate::config::Config;
use crate::error::Result;
use crate::message::InboundMessage;
use crate::rules::{choose_reply, ReplyMatch, ReplySource};
use crate::store::{write_json_atomic, AutomationConfig, AutomationState};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Floor for the pause between cycles
const MIN_CYCLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Checking,
    Processing,
    Replying,
    Persisting,
}

/// Tally of one pass over fetched messages
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingResult {
    pub processed: usize,
    pub replies_sent: usize,
    pub errors: usize,
    pub messages: Vec<InboundMessage>,
}

/// Everything a cycle did, written to `reports/` by the continuous loop
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Local>,
    pub bridge_available: bool,
    pub config: AutomationConfig,
    pub state_before: AutomationState,
    pub processing_result: ProcessingResult,
    pub state_after: Option<AutomationState>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Automation {
    config: AutomationConfig,
    state: AutomationState,
    bridge: BridgeClient,
    target_phone: Option<String>,
    config_file: PathBuf,
    state_file: PathBuf,
    reports_dir: PathBuf,
    phase: CyclePhase,
}

impl Automation {
    /// Load rules and state from the configured files
    pub fn new(config: &Config) -> Self {
        let rules = AutomationConfig::load(&config.automation_config_file);
        let state = AutomationState::load(&config.state_file);
        info!(
            "Loaded automation state: {} processed ids, {} replies sent",
            state.processed_messages.len(),
            state.auto_replies_sent
        );
        Self::with_parts(config, rules, state, BridgeClient::from_config(config))
    }

    pub fn with_parts(
        config: &Config,
        rules: AutomationConfig,
        state: AutomationState,
        bridge: BridgeClient,
    ) -> Self {
        Self {
            config: rules,
            state,
            bridge,
            target_phone: config.target_phone.clone(),
            config_file: config.automation_config_file.clone(),
            state_file: config.state_file.clone(),
            reports_dir: config.reports_dir.clone(),
            phase: CyclePhase::Idle,
        }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn state(&self) -> &AutomationState {
        &self.state
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn bridge(&self) -> &BridgeClient {
        &self.bridge
    }

    pub fn target_phone(&self) -> Option<&str> {
        self.target_phone.as_deref()
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_file)
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        debug!("Cycle phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Reply chosen for a message, if any rule matches its text
    pub fn analyze_message(&self, message: &InboundMessage) -> Option<ReplyMatch> {
        let text = message.text.as_deref().filter(|t| !t.trim().is_empty())?;

        let matched = choose_reply(
            &self.config.intelligent_responses,
            &self.config.auto_reply_keywords,
            &self.config.auto_reply_message,
            text,
        )?;

        if let ReplySource::Category(name) = &matched.source {
            info!("Category detected: {}", name);
        }
        Some(matched)
    }

    /// Send through the bridge, or simulate when it is down for this cycle
    pub async fn send_message(&self, text: &str, target: &str, bridge_available: bool) -> bool {
        if !bridge_available {
            info!("SIMULATED - message to {}: {}", target, text);
            return true;
        }

        match self.bridge.send(target, text).await {
            Ok(_) => {
                info!("Message sent to {}: {}", target, text);
                true
            }
            Err(e) => {
                error!("Sending to {} failed: {}", target, e);
                false
            }
        }
    }

    async fn fetch_messages(
        &self,
        bridge_available: bool,
        result: &mut ProcessingResult,
    ) -> Vec<InboundMessage> {
        let limit = self.config.max_messages_per_check;

        if bridge_available {
            match self.bridge.messages(limit, self.target_phone.as_deref()).await {
                Ok(mut messages) => {
                    messages.truncate(limit);
                    return messages;
                }
                Err(e) => {
                    error!("Bridge messages fetch failed: {}", e);
                    result.errors += 1;
                }
            }
        }

        info!("Using mock messages (bridge unavailable)");
        vec![InboundMessage::mock(self.target_phone.as_deref())]
    }

    /// Fetch, dedupe, match and reply. State is updated in memory only.
    pub async fn process_new_messages(&mut self, bridge_available: bool) -> ProcessingResult {
        let mut result = ProcessingResult::default();
        self.set_phase(CyclePhase::Processing);

        let messages = self.fetch_messages(bridge_available, &mut result).await;
        info!("Fetched {} messages", messages.len());

        for message in messages {
            let id = match message.id.clone() {
                Some(id) => id,
                None => {
                    debug!("Skipping message without id");
                    continue;
                }
            };

            if self.state.is_processed(&id) || !message.is_inbound() {
                continue;
            }

            result.processed += 1;

            if self.config.auto_reply_enabled {
                if let Some(matched) = self.analyze_message(&message) {
                    let target = message
                        .phone
                        .clone()
                        .or_else(|| self.target_phone.clone());

                    match target {
                        Some(target) => {
                            self.set_phase(CyclePhase::Replying);
                            if self
                                .send_message(&matched.reply, &target, bridge_available)
                                .await
                            {
                                result.replies_sent += 1;
                                self.state.auto_replies_sent += 1;
                                info!("Auto-reply sent: {}", matched.reply);
                            } else {
                                result.errors += 1;
                            }
                            self.set_phase(CyclePhase::Processing);
                        }
                        None => {
                            warn!("No recipient for reply to message {}", id);
                            result.errors += 1;
                        }
                    }
                }
            }

            self.state.record_processed(&id);
            result.messages.push(message);
        }

        result
    }

    /// One full check-process-reply-persist cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        info!("Starting automation cycle");
        let timestamp = Local::now();
        let state_before = self.state.clone();

        self.set_phase(CyclePhase::Checking);
        let bridge_available = self.bridge.is_reachable().await;

        let processing_result = self.process_new_messages(bridge_available).await;

        self.set_phase(CyclePhase::Persisting);
        let (success, error, state_after) = match self.state.save(&self.state_file) {
            Ok(()) => (true, None, Some(self.state.clone())),
            Err(e) => {
                error!("Failed to save automation state: {}", e);
                (false, Some(e.to_string()), None)
            }
        };
        self.set_phase(CyclePhase::Idle);

        info!(
            "Cycle complete: processed={} replies_sent={} errors={}",
            processing_result.processed, processing_result.replies_sent, processing_result.errors
        );

        CycleReport {
            timestamp,
            bridge_available,
            config: self.config.clone(),
            state_before,
            processing_result,
            state_after,
            success,
            error,
        }
    }

    /// Write `report` as `automation_cycle_<timestamp>.json`
    pub fn write_report(&self, report: &CycleReport) -> Result<PathBuf> {
        let name = format!(
            "automation_cycle_{}.json",
            report.timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = self.reports_dir.join(name);
        write_json_atomic(&path, report)?;
        Ok(path)
    }

    /// Run cycles until `duration` elapses or `shutdown` resolves.
    ///
    /// At least one cycle runs. Shutdown interrupts the wait between cycles,
    /// never a cycle in progress. Returns the number of completed cycles.
    pub async fn run_continuous<F>(&mut self, duration: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        // None: the duration reaches past what Instant can represent
        let deadline = Instant::now().checked_add(duration);
        let interval =
            Duration::from_secs(self.config.message_check_interval).max(MIN_CYCLE_INTERVAL);
        let mut cycles = 0;

        info!(
            "Starting continuous automation for {} minutes",
            duration.as_secs() / 60
        );

        loop {
            let report = self.run_cycle().await;
            cycles += 1;

            match self.write_report(&report) {
                Ok(path) => debug!("Cycle report written to {}", path.display()),
                Err(e) => warn!("Failed to write cycle report: {}", e),
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                break;
            }

            let wait = interval.min(remaining);
            info!("Waiting {} seconds until next cycle", wait.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("Automation stopped by interrupt");
                    break;
                }
            }
        }

        info!("Continuous automation finished after {} cycles", cycles);
        cycles
    }
}
