//! Agent adapters.
//!
//! Each adapter knows how to turn an [`EvalInstance`] into a command line and
//! a prompt for one concrete agent CLI, and how to read that agent's raw
//! output back into a structured [`AgentOutput`]. The runner owns process
//! execution; adapters stay pure so they are trivially testable.
//!
//! Adapters are selected from an explicit registration table keyed by name,
//! built at process start. No import-time side effects, deterministic order.

pub mod aider;
pub mod claude_code;
pub mod subprocess;

use std::path::Path;
use std::time::Duration;

use crate::config::AgentSettings;
use crate::error::ConfigError;
use crate::model::{AgentOutput, EvalInstance, ExecutionMode};

pub use aider::AiderAgent;
pub use claude_code::ClaudeCodeAgent;
pub use subprocess::SubprocessAgent;

/// Contract between the runner and one agent CLI.
pub trait AgentAdapter: Send + Sync {
    /// Registered agent name.
    fn name(&self) -> &str;

    /// Whether the agent edits files on the host or runs inside the
    /// workspace container. Decides how the runner collects the patch.
    fn execution_mode(&self) -> ExecutionMode;

    /// Whether the prompt is piped via stdin. When false the prompt is
    /// expected to already be part of the command line.
    fn prompt_via_stdin(&self) -> bool {
        true
    }

    /// Time budget for one invocation.
    fn timeout(&self) -> Duration;

    /// Environment variables for the agent process. An empty value means
    /// "unset this variable".
    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Applies configuration options to the adapter.
    fn configure(&mut self, settings: &AgentSettings);

    /// Builds the argument vector to invoke the agent.
    fn build_command(&self, instance: &EvalInstance, workdir: &Path) -> Vec<String>;

    /// Builds the natural-language task given to the agent.
    fn build_prompt(&self, instance: &EvalInstance) -> String;

    /// Turns raw process output into a structured [`AgentOutput`].
    /// Non-zero exit is not automatically a failure; interpretation is
    /// agent-specific.
    fn parse_output(
        &self,
        stdout: &str,
        stderr: &str,
        exit_code: i32,
        duration: Duration,
    ) -> AgentOutput;
}

type AgentCtor = fn() -> Box<dyn AgentAdapter>;

/// Static registration table: name to constructor.
static AGENTS: &[(&str, AgentCtor)] = &[
    ("claude-code", || Box::new(ClaudeCodeAgent::new())),
    ("aider", || Box::new(AiderAgent::new())),
    ("subprocess", || Box::new(SubprocessAgent::new())),
];

/// Instantiates and configures the agent registered under
/// `settings.name`.
pub fn create_agent(settings: &AgentSettings) -> Result<Box<dyn AgentAdapter>, ConfigError> {
    let ctor = AGENTS
        .iter()
        .find(|(name, _)| *name == settings.name)
        .map(|(_, ctor)| ctor)
        .ok_or_else(|| ConfigError::UnknownAgent(settings.name.clone()))?;
    let mut agent = ctor();
    agent.configure(settings);
    Ok(agent)
}

/// All registered agent names, in registration order.
pub fn list_agents() -> Vec<&'static str> {
    AGENTS.iter().map(|(name, _)| *name).collect()
}

/// Shared prompt shape for bug-fix instances.
pub(crate) fn default_prompt(instance: &EvalInstance) -> String {
    let mut parts = vec![
        "Please fix the following issue in this repository.".to_string(),
        String::new(),
        "## Issue".to_string(),
        instance.problem_statement.clone(),
    ];
    if !instance.hints_text.is_empty() {
        parts.push(String::new());
        parts.push("## Hints".to_string());
        parts.push(instance.hints_text.clone());
    }
    parts.push(String::new());
    parts.push(
        "Make the minimal changes needed to fix the issue. \
         Do not change any tests. Do not add unnecessary changes."
            .to_string(),
    );
    parts.join("\n")
}

#[cfg(test)]
pub(crate) fn test_instance() -> EvalInstance {
    EvalInstance {
        instance_id: "test__repo-1".to_string(),
        dataset_name: "test".to_string(),
        repo: "owner/repo".to_string(),
        base_commit: "abc123".to_string(),
        problem_statement: "TypeError when frobnicating".to_string(),
        hints_text: "look at frob.py".to_string(),
        test_patch: String::new(),
        gold_patch: String::new(),
        fail_to_pass: Vec::new(),
        pass_to_pass: Vec::new(),
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut settings = AgentSettings::default();
        settings.name = "aider".to_string();
        let agent = create_agent(&settings).unwrap();
        assert_eq!(agent.name(), "aider");

        settings.name = "nonexistent".to_string();
        assert!(matches!(
            create_agent(&settings),
            Err(ConfigError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_list_agents_deterministic() {
        assert_eq!(list_agents(), vec!["claude-code", "aider", "subprocess"]);
    }

    #[test]
    fn test_default_prompt_includes_hints_only_when_present() {
        let mut instance = test_instance();
        let prompt = default_prompt(&instance);
        assert!(prompt.contains("## Issue"));
        assert!(prompt.contains("## Hints"));
        assert!(prompt.contains("frob.py"));

        instance.hints_text.clear();
        let prompt = default_prompt(&instance);
        assert!(!prompt.contains("## Hints"));
    }

    #[test]
    fn test_timeout_flows_from_settings() {
        let mut settings = AgentSettings::default();
        settings.name = "claude-code".to_string();
        settings.timeout_secs = 42;
        let agent = create_agent(&settings).unwrap();
        assert_eq!(agent.timeout(), Duration::from_secs(42));
    }
}
