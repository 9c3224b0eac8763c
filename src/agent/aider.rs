//! Adapter for the Aider CLI.
//!
//! Host-mode agent: aider edits files in the working tree and the patch is
//! collected via `git diff`. The prompt travels as the `--message` argument.

use std::path::Path;
use std::time::Duration;

use crate::config::AgentSettings;
use crate::model::{AgentOutput, EvalInstance, ExecutionMode};

use super::{default_prompt, AgentAdapter};

pub struct AiderAgent {
    timeout: Duration,
    model: String,
    env: Vec<(String, String)>,
}

impl AiderAgent {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            model: String::new(),
            env: Vec::new(),
        }
    }
}

impl Default for AiderAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for AiderAgent {
    fn name(&self) -> &str {
        "aider"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Host
    }

    fn prompt_via_stdin(&self) -> bool {
        false
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn environment(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn configure(&mut self, settings: &AgentSettings) {
        self.timeout = settings.timeout();
        if !settings.model.is_empty() {
            self.model = settings.model.clone();
        }
        self.env = settings.env.clone();
    }

    fn build_command(&self, instance: &EvalInstance, _workdir: &Path) -> Vec<String> {
        let mut cmd = vec![
            "aider".to_string(),
            "--yes-always".to_string(),
            "--no-git".to_string(),
            "--no-auto-commits".to_string(),
        ];
        if !self.model.is_empty() {
            cmd.push("--model".to_string());
            cmd.push(self.model.clone());
        }
        cmd.push("--message".to_string());
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
        // Patch is collected from the workspace diff.
        AgentOutput::new(self.name(), exit_code, stdout, stderr, duration)
    }
}
