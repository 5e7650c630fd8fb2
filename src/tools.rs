//! Tool-call demo harness
//!
//! Drives the CLI as a subprocess the way an agent tool integration would and
//! reshapes its text output into `{tool, success, ...}` envelopes.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Printed by `send` on success
pub const SEND_SUCCESS_MARKER: &str = "Message sent: true";
/// Printed by `status` when the bridge answered
pub const BRIDGE_AVAILABLE_MARKER: &str = "bridge: available";
/// Printed by `status` when the automation files are usable
pub const AUTOMATION_AVAILABLE_MARKER: &str = "automation: available";

#[derive(Debug, Clone, Serialize)]
pub struct ToolEnvelope {
    pub tool: String,
    pub success: bool,
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ToolEnvelope {
    fn new(tool: &str, success: bool, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool: tool.to_string(),
            success,
            timestamp: Local::now(),
            details,
        }
    }

    fn failed(tool: &str, error: &Error) -> Self {
        Self::new(tool, false, json!({ "error": error.to_string() }))
    }
}

/// Runs `program [base_args...] <subcommand> [args...]`
pub struct ToolHarness {
    program: PathBuf,
    base_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ToolHarness {
    pub fn new(program: &Path, base_args: Vec<String>) -> Self {
        Self {
            program: program.to_path_buf(),
            base_args,
            working_dir: None,
        }
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.output().map_err(|e| {
            Error::CommandFailed(format!("{} {}: {}", self.program.display(), args.join(" "), e))
        })
    }

    /// Tool `send_whatsapp_message`
    pub fn send_message(&self, message: &str, phone: &str) -> ToolEnvelope {
        const TOOL: &str = "send_whatsapp_message";
        let output = match self.run(&["send", message, "--to", phone]) {
            Ok(o) => o,
            Err(e) => return ToolEnvelope::failed(TOOL, &e),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        ToolEnvelope::new(
            TOOL,
            stdout.contains(SEND_SUCCESS_MARKER),
            json!({
                "message": message,
                "phone": phone,
                "output": stdout.trim(),
                "error": non_empty(stderr.trim()),
            }),
        )
    }

    /// Tool `get_whatsapp_messages` - runs one test cycle and lists what it saw
    pub fn get_messages(&self, limit: usize) -> ToolEnvelope {
        const TOOL: &str = "get_whatsapp_messages";
        let output = match self.run(&["test"]) {
            Ok(o) => o,
            Err(e) => return ToolEnvelope::failed(TOOL, &e),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match first_json_document(&stdout) {
            Some(report) => {
                let messages = report
                    .pointer("/processing_result/messages")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let total = messages.len();
                let limited: Vec<Value> = messages.into_iter().take(limit).collect();
                ToolEnvelope::new(
                    TOOL,
                    true,
                    json!({ "messages": limited, "total_found": total }),
                )
            }
            None => ToolEnvelope::new(
                TOOL,
                false,
                json!({ "error": "No JSON data found", "raw_output": stdout }),
            ),
        }
    }

    /// Tool `whatsapp_bridge_status`
    pub fn bridge_status(&self) -> ToolEnvelope {
        const TOOL: &str = "whatsapp_bridge_status";
        let output = match self.run(&["status"]) {
            Ok(o) => o,
            Err(e) => return ToolEnvelope::failed(TOOL, &e),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        ToolEnvelope::new(
            TOOL,
            output.status.success(),
            json!({
                "bridge_available": stdout.contains(BRIDGE_AVAILABLE_MARKER),
                "automation_available": stdout.contains(AUTOMATION_AVAILABLE_MARKER),
                "full_status": stdout,
            }),
        )
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// First JSON object in `text` starting at the beginning of a line
pub fn first_json_document(text: &str) -> Option<Value> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('{') {
            let start = offset + (line.len() - line.trim_start().len());
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            if let Some(Ok(value)) = stream.next() {
                return Some(value);
            }
        }
        offset += line.len();
    }
    None
}

/// Summary of a demo run over the three tools
pub fn demo_report(results: &[&ToolEnvelope]) -> Value {
    let scenarios: Vec<Value> = results
        .iter()
        .map(|r| json!({ "name": r.tool, "success": r.success }))
        .collect();

    json!({
        "demo_timestamp": Local::now().to_rfc3339(),
        "scenarios_tested": scenarios,
        "all_tools_functional": results.iter().all(|r| r.success),
    })
}
