//! Adapter for the Claude Code CLI.
//!
//! Runs `claude` in non-interactive mode (`--print`) with JSON output. The
//! agent edits files directly on the host side of the workspace; the patch is
//! collected via `git diff` afterwards, so `parse_output` leaves the patch
//! field empty and focuses on cost/usage extraction.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::config::AgentSettings;
use crate::model::{AgentOutput, EvalInstance, ExecutionMode};

use super::{default_prompt, AgentAdapter};

pub struct ClaudeCodeAgent {
    timeout: Duration,
    max_turns: i64,
    model: String,
    permission_mode: String,
    env: Vec<(String, String)>,
}

impl ClaudeCodeAgent {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            max_turns: 30,
            model: String::new(),
            permission_mode: "bypassPermissions".to_string(),
            env: Vec::new(),
        }
    }
}

impl Default for ClaudeCodeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for ClaudeCodeAgent {
    fn name(&self) -> &str {
        "claude-code"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Host
    }

    fn prompt_via_stdin(&self) -> bool {
        // The prompt is the last positional argument.
        false
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        // Unset CLAUDECODE so the nested-session check does not trip when the
        // harness itself runs inside a Claude Code session.
        env.push(("CLAUDECODE".to_string(), String::new()));
        env
    }

    fn configure(&mut self, settings: &AgentSettings) {
        self.timeout = settings.timeout();
        if !settings.model.is_empty() {
            self.model = settings.model.clone();
        }
        if let Some(turns) = settings.int_option("max_turns") {
            self.max_turns = turns;
        }
        if let Some(mode) = settings.str_option("permission_mode") {
            self.permission_mode = mode.to_string();
        }
        self.env = settings.env.clone();
    }

    fn build_command(&self, instance: &EvalInstance, _workdir: &Path) -> Vec<String> {
        let mut cmd = vec![
            "claude".to_string(),
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
            "--permission-mode".to_string(),
            self.permission_mode.clone(),
        ];
        if !self.model.is_empty() {
            cmd.push("--model".to_string());
            cmd.push(self.model.clone());
        }
        cmd.push(self.build_prompt(instance));
        cmd
    }

    fn build_prompt(&self, instance: &EvalInstance) -> String {
        default_prompt(instance)
    }

    fn parse_output(
        &self,
        stdout: &str,
        stderr: &str,
        exit_code: i32,
        duration: Duration,
    ) -> AgentOutput {
        let mut output = AgentOutput::new(self.name(), exit_code, stdout, stderr, duration);

        // `claude --print --output-format json` emits a single JSON object:
        // {"type":"result","result":"...","total_cost_usd":...,"usage":{...}}
        match serde_json::from_str::<serde_json::Value>(stdout) {
            Ok(data) => {
                output.cost_usd = data.get("total_cost_usd").and_then(|v| v.as_f64());
                if let Some(result) = data.get("result").and_then(|v| v.as_str()) {
                    output.stdout = result.to_string();
                }
                for key in ["session_id", "num_turns", "duration_api_ms", "stop_reason"] {
                    if let Some(value) = data.get(key) {
                        output.metadata.insert(key.to_string(), value.clone());
                    }
                }
                if let Some(usage) = data.get("usage") {
                    let tokens = ["input_tokens", "output_tokens", "cache_read_input_tokens"]
                        .iter()
                        .filter_map(|k| usage.get(k).and_then(|v| v.as_u64()))
                        .sum::<u64>();
                    if tokens > 0 {
                        output.tokens_used = Some(tokens);
                    }
                }
                output.model_name = data
                    .get("modelUsage")
                    .and_then(|v| v.as_object())
                    .and_then(|m| m.keys().next().cloned());
            }
            Err(_) => {
                warn!("Failed to parse Claude Code JSON output");
            }
        }

        output
    }
}
