//! Generic subprocess agent.
//!
//! Runs an arbitrary command template against the instance. Intended for
//! wiring in agents without a dedicated adapter, and as the one built-in
//! adapter that can run in contained mode, where the patch is extracted from
//! the agent's own stdout rather than from a workspace diff.

use std::path::Path;
use std::time::Duration;

use crate::config::AgentSettings;
use crate::model::{AgentOutput, EvalInstance, ExecutionMode};
use crate::patch::extract_patch;

use super::AgentAdapter;

pub struct SubprocessAgent {
    command_template: String,
    prompt_template: String,
    timeout: Duration,
    mode: ExecutionMode,
    env: Vec<(String, String)>,
}

impl SubprocessAgent {
    pub fn new() -> Self {
        Self {
            command_template: String::new(),
            prompt_template: "{problem_statement}".to_string(),
            timeout: Duration::from_secs(300),
            mode: ExecutionMode::Host,
            env: Vec::new(),
        }
    }
}

impl Default for SubprocessAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn fill(template: &str, instance: &EvalInstance, workdir: &str) -> String {
    template
        .replace("{workdir}", workdir)
        .replace("{instance_id}", &instance.instance_id)
        .replace("{repo}", &instance.repo)
        .replace("{problem_statement}", &instance.problem_statement)
        .replace("{hints_text}", &instance.hints_text)
}

impl AgentAdapter for SubprocessAgent {
    fn name(&self) -> &str {
        "subprocess"
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn environment(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn configure(&mut self, settings: &AgentSettings) {
        self.timeout = settings.timeout();
        if let Some(template) = settings.str_option("command_template") {
            self.command_template = template.to_string();
        }
        if let Some(template) = settings.str_option("prompt_template") {
            self.prompt_template = template.to_string();
        }
        if let Some(mode) = settings.str_option("execution_mode") {
            self.mode = match mode {
                "container" => ExecutionMode::Container,
                _ => ExecutionMode::Host,
            };
        }
        self.env = settings.env.clone();
    }

    fn build_command(&self, instance: &EvalInstance, workdir: &Path) -> Vec<String> {
        let cmd = fill(
            &self.command_template,
            instance,
            &workdir.to_string_lossy(),
        );
        cmd.split_whitespace().map(str::to_string).collect()
    }

    fn build_prompt(&self, instance: &EvalInstance) -> String {
        fill(&self.prompt_template, instance, "")
    }

    fn parse_output(
        &self,
        stdout: &str,
        stderr: &str,
        exit_code: i32,
        duration: Duration,
    ) -> AgentOutput {
        AgentOutput::new(self.name(), exit_code, stdout, stderr, duration)
            .with_patch(extract_patch(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_instance;

    fn configured(options: serde_json::Value) -> SubprocessAgent {
        let mut agent = SubprocessAgent::new();
        let mut settings = AgentSettings::default();
        settings.options = serde_json::from_value(options).unwrap();
        agent.configure(&settings);
        agent
    }

    #[test]
    fn test_command_template_substitution() {
        let agent = configured(serde_json::json!({
            "command_template": "my-agent --dir {workdir} --task {instance_id}",
        }));
        let cmd = agent.build_command(&test_instance(), Path::new("/ws/a"));
        assert_eq!(cmd, vec!["my-agent", "--dir", "/ws/a", "--task", "test__repo-1"]);
    }

    #[test]
    fn test_prompt_template_substitution() {
        let agent = configured(serde_json::json!({
            "prompt_template": "Fix: {problem_statement} ({repo})",
        }));
        let prompt = agent.build_prompt(&test_instance());
        assert_eq!(prompt, "Fix: TypeError when frobnicating (owner/repo)");
    }

    #[test]
    fn test_container_mode_from_options() {
        let agent = configured(serde_json::json!({"execution_mode": "container"}));
        assert_eq!(agent.execution_mode(), ExecutionMode::Container);

        let agent = configured(serde_json::json!({}));
        assert_eq!(agent.execution_mode(), ExecutionMode::Host);
    }

    #[test]
    fn test_parse_output_extracts_patch_from_stdout() {
        let agent = SubprocessAgent::new();
        let stdout = "working...\ndiff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b";
        let output = agent.parse_output(stdout, "", 0, Duration::from_secs(1));
        assert!(output.patch.starts_with("diff --git"));
    }
}
