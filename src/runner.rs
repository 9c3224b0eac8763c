//! Run orchestration.
//!
//! The [`Runner`] drives each instance through the pipeline: provision a
//! workspace, invoke the agent, collect the patch, evaluate, tear down. Any
//! stage failure short-circuits to a terminal result; workspace teardown
//! happens on every path out. Instances fan out across a bounded worker pool
//! and results are aggregated in completion order.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{create_agent, AgentAdapter};
use crate::config::RunConfig;
use crate::error::{AgentError, ConfigError};
use crate::evaluator::{create_evaluator, Evaluator};
use crate::model::{
    AgentOutput, EvalInstance, EvalResult, EvalStatus, ExecutionMode, InstanceRunResult,
    RunSummary,
};
use crate::workspace::{provider_for, Workspace, WorkspaceProvider};

pub struct Runner {
    config: RunConfig,
    provider: Arc<dyn WorkspaceProvider>,
    agent: Arc<dyn AgentAdapter>,
    evaluator: Arc<dyn Evaluator>,
}

impl Runner {
    /// Builds a runner with every registered component resolved from the
    /// configuration. Fails fast on any unknown name.
    pub fn from_config(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let provider = provider_for(&config.workspace)?;
        let agent: Arc<dyn AgentAdapter> = Arc::from(create_agent(&config.agent)?);
        let evaluator: Arc<dyn Evaluator> = Arc::from(create_evaluator(
            &config.evaluator,
            config.workspace.test_timeout(),
        )?);
        Ok(Self {
            config,
            provider,
            agent,
            evaluator,
        })
    }

    /// Builds a runner from pre-constructed components.
    pub fn new(
        config: RunConfig,
        provider: Arc<dyn WorkspaceProvider>,
        agent: Arc<dyn AgentAdapter>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            config,
            provider,
            agent,
            evaluator,
        }
    }

    /// Runs every instance through the pipeline and returns the finalized
    /// summary. Instance failures never abort the run.
    pub async fn run(&self, instances: Vec<EvalInstance>) -> RunSummary {
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().to_string()[..8]
        );
        let dataset_name = instances
            .first()
            .map(|i| i.dataset_name.clone())
            .unwrap_or_else(|| self.config.dataset.name.clone());

        let mut summary = RunSummary::new(
            &run_id,
            dataset_name,
            self.agent.name().to_string(),
            instances.len(),
        );

        info!(
            run_id = %run_id,
            instances = instances.len(),
            agent = self.agent.name(),
            workspace = %self.config.workspace.kind,
            max_workers = self.config.max_workers,
            "Starting run"
        );

        // Instances excluded by the id filter never reach provisioning; they
        // are recorded as skipped so the summary accounts for every instance.
        let selection = &self.config.dataset.instance_ids;
        let (selected, excluded): (Vec<_>, Vec<_>) = instances
            .into_iter()
            .partition(|i| selection.is_empty() || selection.contains(&i.instance_id));

        for instance in excluded {
            let result = EvalResult::terminal(
                &instance.instance_id,
                EvalStatus::Skipped,
                "excluded by instance filter",
            );
            summary.record(InstanceRunResult {
                instance,
                agent_output: None,
                eval_result: result,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = JoinSet::new();
        let mut in_flight = std::collections::HashMap::new();

        for instance in selected {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let agent = Arc::clone(&self.agent);
            let evaluator = Arc::clone(&self.evaluator);
            let config = self.config.clone();
            let task_instance = instance.clone();

            let handle = tasks.spawn(async move {
                // Holding the permit for the whole pipeline bounds the number
                // of live workspaces, not just the number of live agents.
                let _permit = semaphore.acquire_owned().await;
                run_instance(provider, agent, evaluator, config, task_instance).await
            });
            in_flight.insert(handle.id(), instance);
        }

        let total = summary.total_instances;
        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    result
                }
                Err(join_err) => {
                    let Some(instance) = in_flight.remove(&join_err.id()) else {
                        error!(error = %join_err, "Worker failed for an unknown task");
                        continue;
                    };
                    error!(instance = %instance.instance_id, "Worker panicked");
                    let result = EvalResult::terminal(
                        &instance.instance_id,
                        EvalStatus::Error,
                        format!("worker panicked: {join_err}"),
                    );
                    InstanceRunResult {
                        instance,
                        agent_output: None,
                        eval_result: result,
                    }
                }
            };

            info!(
                instance = %result.instance.instance_id,
                status = %result.eval_result.status,
                completed = summary.results.len() + 1,
                total,
                resolved_so_far = summary.resolved + result.resolved() as usize,
                "Instance finished"
            );
            summary.record(result);
        }

        summary.finalize();
        info!(
            run_id = %run_id,
            resolved = summary.resolved,
            failed = summary.failed,
            errors = summary.errors,
            timeouts = summary.timeouts,
            skipped = summary.skipped,
            resolve_rate = summary.resolve_rate(),
            "Run complete"
        );
        summary
    }
}

/// Drives one instance through the pipeline. Infallible: every failure mode
/// becomes a terminal result. The workspace is torn down before returning
/// unless cleanup is disabled in the configuration.
async fn run_instance(
    provider: Arc<dyn WorkspaceProvider>,
    agent: Arc<dyn AgentAdapter>,
    evaluator: Arc<dyn Evaluator>,
    config: RunConfig,
    instance: EvalInstance,
) -> InstanceRunResult {
    info!(instance = %instance.instance_id, "Provisioning workspace");
    let mut workspace = match provider.provision(&instance).await {
        Ok(ws) => ws,
        Err(e) => {
            return InstanceRunResult {
                eval_result: EvalResult::terminal(
                    &instance.instance_id,
                    EvalStatus::Error,
                    format!("Provisioning failed: {e}"),
                ),
                instance,
                agent_output: None,
            };
        }
    };

    let (agent_output, eval_result) =
        run_stages(agent.as_ref(), evaluator.as_ref(), workspace.as_ref(), &instance).await;

    if config.workspace.cleanup {
        workspace.teardown().await;
    } else {
        warn!(
            instance = %instance.instance_id,
            path = %workspace.host_path().display(),
            "Cleanup disabled; workspace kept for inspection"
        );
    }

    InstanceRunResult {
        instance,
        agent_output,
        eval_result,
    }
}

/// Agent invocation, patch collection, and evaluation. Split out so the
/// caller can guarantee teardown regardless of which stage failed.
async fn run_stages(
    agent: &dyn AgentAdapter,
    evaluator: &dyn Evaluator,
    workspace: &dyn Workspace,
    instance: &EvalInstance,
) -> (Option<AgentOutput>, EvalResult) {
    let mode = agent.execution_mode();
    info!(instance = %instance.instance_id, agent = agent.name(), "Invoking agent");

    let invocation = match mode {
        ExecutionMode::Host => invoke_on_host(agent, instance, workspace.host_path()).await,
        ExecutionMode::Container => invoke_in_workspace(agent, instance, workspace).await,
    };

    let mut agent_output = match invocation {
        Ok(output) => output,
        Err(AgentError::Timeout(d)) => {
            return (
                None,
                EvalResult::terminal(
                    &instance.instance_id,
                    EvalStatus::Timeout,
                    format!("Agent timed out after {d:?}; no patch collected"),
                ),
            );
        }
        Err(e) => {
            return (
                None,
                EvalResult::terminal(
                    &instance.instance_id,
                    EvalStatus::Error,
                    format!("Agent invocation failed: {e}"),
                ),
            );
        }
    };
    agent_output.instance_id = instance.instance_id.clone();

    // Host-mode agents edit the tree directly; the diff is the patch of
    // record. Contained agents already delivered the patch through their
    // parsed output.
    if mode == ExecutionMode::Host {
        match workspace.diff().await {
            Ok(diff) => agent_output.patch = diff,
            Err(e) => {
                let result = EvalResult::terminal(
                    &instance.instance_id,
                    EvalStatus::Error,
                    format!("Failed to collect patch: {e}"),
                );
                return (Some(agent_output), result);
            }
        }
    }

    if !crate::patch::looks_like_patch(&agent_output.patch) {
        warn!(instance = %instance.instance_id, "Agent produced no usable patch");
    }

    info!(instance = %instance.instance_id, "Evaluating");
    let eval_result = evaluator
        .evaluate(instance, &agent_output, mode, workspace)
        .await;
    (Some(agent_output), eval_result)
}

/// Runs a host-mode agent as a child process inside the workspace's working
/// tree, with the adapter's environment applied (empty value = unset) and a
/// hard wall-clock budget. On expiry the process tree is killed via
/// `kill_on_drop` and the invocation reports [`AgentError::Timeout`].
async fn invoke_on_host(
    agent: &dyn AgentAdapter,
    instance: &EvalInstance,
    workdir: &Path,
) -> Result<AgentOutput, AgentError> {
    let argv = agent.build_command(instance, workdir);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AgentError::Spawn("empty command".to_string()))?;

    let prompt = agent.prompt_via_stdin().then(|| agent.build_prompt(instance));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(if prompt.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in agent.environment() {
        if value.is_empty() {
            cmd.env_remove(&key);
        } else {
            cmd.env(&key, &value);
        }
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AgentError::NotFound(program.clone())
        } else {
            AgentError::Spawn(format!("{program}: {e}"))
        }
    })?;

    // The stdin write shares the timeout budget with the wait: an agent that
    // never reads stdin would otherwise block the worker forever once the
    // prompt outgrows the OS pipe buffer.
    let timeout = agent.timeout();
    let invocation = async {
        if let Some(prompt) = prompt {
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(timeout, invocation).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(agent.parse_output(
                &stdout,
                &stderr,
                output.status.code().unwrap_or(-1),
                start.elapsed(),
            ))
        }
        Ok(Err(e)) => Err(AgentError::Io(e)),
        // Dropping the consumed child handle kills the process tree.
        Err(_) => Err(AgentError::Timeout(timeout)),
    }
}

/// Runs a contained agent through the workspace's own exec channel. The
/// prompt is delivered through command-template substitution, not stdin.
async fn invoke_in_workspace(
    agent: &dyn AgentAdapter,
    instance: &EvalInstance,
    workspace: &dyn Workspace,
) -> Result<AgentOutput, AgentError> {
    let argv = agent.build_command(instance, workspace.host_path());
    if argv.is_empty() {
        return Err(AgentError::Spawn("empty command".to_string()));
    }
    let command = argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");

    let start = Instant::now();
    match workspace.run(&command, agent.timeout()).await {
        Ok(exec) => Ok(agent.parse_output(&exec.output, "", exec.exit_code, start.elapsed())),
        Err(crate::error::WorkspaceError::CommandTimeout(d)) => Err(AgentError::Timeout(d)),
        Err(e) => Err(AgentError::Spawn(e.to_string())),
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::model::AgentOutput;
    use std::time::Duration;

    struct EchoAgent {
        timeout: Duration,
        via_stdin: bool,
    }

    impl AgentAdapter for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Host
        }

        fn prompt_via_stdin(&self) -> bool {
            self.via_stdin
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn environment(&self) -> Vec<(String, String)> {
            vec![
                ("FIXEVAL_TEST_SET".to_string(), "yes".to_string()),
                ("PATH_UNSET_PROBE".to_string(), String::new()),
            ]
        }

        fn configure(&mut self, _settings: &AgentSettings) {}

        fn build_command(&self, _instance: &EvalInstance, _workdir: &Path) -> Vec<String> {
            if self.via_stdin {
                vec!["cat".to_string()]
            } else {
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo \"var=$FIXEVAL_TEST_SET\"".to_string(),
                ]
            }
        }

        fn build_prompt(&self, instance: &EvalInstance) -> String {
            format!("prompt for {}", instance.instance_id)
        }

        fn parse_output(
            &self,
            stdout: &str,
            stderr: &str,
            exit_code: i32,
            duration: Duration,
        ) -> AgentOutput {
            AgentOutput::new(self.name(), exit_code, stdout, stderr, duration)
        }
    }

    fn instance() -> EvalInstance {
        EvalInstance {
            instance_id: "inst-1".to_string(),
            dataset_name: "test".to_string(),
            repo: "owner/repo".to_string(),
            base_commit: String::new(),
            problem_statement: "bug".to_string(),
            hints_text: String::new(),
            test_patch: String::new(),
            gold_patch: String::new(),
            fail_to_pass: Vec::new(),
            pass_to_pass: Vec::new(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_invoke_on_host_pipes_prompt() {
        let agent = EchoAgent {
            timeout: Duration::from_secs(5),
            via_stdin: true,
        };
        let dir = tempfile::tempdir().unwrap();
        let output = invoke_on_host(&agent, &instance(), dir.path()).await.unwrap();
        assert_eq!(output.stdout, "prompt for inst-1");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_invoke_on_host_applies_environment() {
        let agent = EchoAgent {
            timeout: Duration::from_secs(5),
            via_stdin: false,
        };
        let dir = tempfile::tempdir().unwrap();
        let output = invoke_on_host(&agent, &instance(), dir.path()).await.unwrap();
        assert!(output.stdout.contains("var=yes"));
    }

    #[tokio::test]
    async fn test_invoke_on_host_missing_binary() {
        struct Missing;
        impl AgentAdapter for Missing {
            fn name(&self) -> &str {
                "missing"
            }
            fn execution_mode(&self) -> ExecutionMode {
                ExecutionMode::Host
            }
            fn timeout(&self) -> Duration {
                Duration::from_secs(1)
            }
            fn configure(&mut self, _: &AgentSettings) {}
            fn build_command(&self, _: &EvalInstance, _: &Path) -> Vec<String> {
                vec!["fixeval-no-such-binary".to_string()]
            }
            fn build_prompt(&self, _: &EvalInstance) -> String {
                String::new()
            }
            fn parse_output(&self, _: &str, _: &str, code: i32, d: Duration) -> AgentOutput {
                AgentOutput::new("missing", code, "", "", d)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let err = invoke_on_host(&Missing, &instance(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invoke_on_host_timeout() {
        struct Sleepy;
        impl AgentAdapter for Sleepy {
            fn name(&self) -> &str {
                "sleepy"
            }
            fn execution_mode(&self) -> ExecutionMode {
                ExecutionMode::Host
            }
            fn prompt_via_stdin(&self) -> bool {
                false
            }
            fn timeout(&self) -> Duration {
                Duration::from_millis(100)
            }
            fn configure(&mut self, _: &AgentSettings) {}
            fn build_command(&self, _: &EvalInstance, _: &Path) -> Vec<String> {
                vec!["sleep".to_string(), "30".to_string()]
            }
            fn build_prompt(&self, _: &EvalInstance) -> String {
                String::new()
            }
            fn parse_output(&self, _: &str, _: &str, code: i32, d: Duration) -> AgentOutput {
                AgentOutput::new("sleepy", code, "", "", d)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let err = invoke_on_host(&Sleepy, &instance(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_invoke_on_host_timeout_covers_stdin_write() {
        // Agent declares stdin delivery but its process never reads stdin;
        // the prompt is far larger than any OS pipe buffer, so the write can
        // only complete if the timeout bounds it.
        struct DeafAgent;
        impl AgentAdapter for DeafAgent {
            fn name(&self) -> &str {
                "deaf"
            }
            fn execution_mode(&self) -> ExecutionMode {
                ExecutionMode::Host
            }
            fn timeout(&self) -> Duration {
                Duration::from_millis(100)
            }
            fn configure(&mut self, _: &AgentSettings) {}
            fn build_command(&self, _: &EvalInstance, _: &Path) -> Vec<String> {
                vec!["sleep".to_string(), "30".to_string()]
            }
            fn build_prompt(&self, _: &EvalInstance) -> String {
                "x".repeat(4 * 1024 * 1024)
            }
            fn parse_output(&self, _: &str, _: &str, code: i32, d: Duration) -> AgentOutput {
                AgentOutput::new("deaf", code, "", "", d)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let err = invoke_on_host(&DeafAgent, &instance(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-arg_1.0"), "plain-arg_1.0");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
