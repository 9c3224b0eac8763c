//! End-to-end pipeline tests with fault-injecting stub components.
//!
//! Exercise the runner's resource-safety contract (teardown on every path),
//! per-instance isolation under concurrency, and the terminal status mapping
//! for each failure stage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fixeval::agent::AgentAdapter;
use fixeval::config::{AgentSettings, RunConfig};
use fixeval::evaluator::create_evaluator;
use fixeval::runner::Runner;
use fixeval::workspace::{ExecOutput, Workspace, WorkspaceProvider};
use fixeval::{
    AgentOutput, EvalInstance, EvalStatus, ExecutionMode, WorkspaceError,
};

/// What each stage of a stub workspace should do.
#[derive(Clone, Default)]
struct Faults {
    /// Instance ids whose provisioning fails.
    provision_fail: Vec<String>,
    /// Instance ids whose test patch fails to apply.
    patch_fail: Vec<String>,
    /// Instance ids whose test run times out.
    test_timeout: Vec<String>,
    /// Test output for instances that run to completion.
    test_output: String,
    test_exit_code: i32,
}

/// Shared observer for assertions after the run.
#[derive(Default)]
struct Observed {
    provisions: AtomicUsize,
    teardowns: AtomicUsize,
    /// Host paths handed out, for uniqueness checks.
    paths: Mutex<Vec<PathBuf>>,
}

struct StubProvider {
    faults: Faults,
    observed: Arc<Observed>,
}

#[async_trait]
impl WorkspaceProvider for StubProvider {
    fn kind(&self) -> &'static str {
        "stub"
    }

    async fn provision(
        &self,
        instance: &EvalInstance,
    ) -> Result<Box<dyn Workspace>, WorkspaceError> {
        if self
            .faults
            .provision_fail
            .contains(&instance.instance_id)
        {
            return Err(WorkspaceError::Provision("image pull failed".to_string()));
        }
        self.observed.provisions.fetch_add(1, Ordering::SeqCst);

        // Host-mode agents spawn with the workspace as their working
        // directory, so the stub must hand out a path that exists.
        let dir = tempfile::tempdir()
            .map_err(|e| WorkspaceError::Provision(e.to_string()))?;
        let path = dir.path().to_path_buf();
        self.observed.paths.lock().unwrap().push(path.clone());
        Ok(Box::new(StubWorkspace {
            instance_id: instance.instance_id.clone(),
            path,
            _dir: dir,
            faults: self.faults.clone(),
            observed: Arc::clone(&self.observed),
            torn_down: false,
        }))
    }
}

struct StubWorkspace {
    instance_id: String,
    path: PathBuf,
    _dir: tempfile::TempDir,
    faults: Faults,
    observed: Arc<Observed>,
    torn_down: bool,
}

#[async_trait]
impl Workspace for StubWorkspace {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn host_path(&self) -> &Path {
        &self.path
    }

    async fn run(&self, _command: &str, _timeout: Duration) -> Result<ExecOutput, WorkspaceError> {
        if self.faults.test_timeout.contains(&self.instance_id) {
            return Err(WorkspaceError::CommandTimeout(Duration::from_secs(600)));
        }
        Ok(ExecOutput {
            exit_code: self.faults.test_exit_code,
            output: self.faults.test_output.clone(),
        })
    }

    async fn apply_patch(&self, patch: &str) -> Result<(), WorkspaceError> {
        if patch.is_empty() {
            return Ok(());
        }
        if self.faults.patch_fail.contains(&self.instance_id) {
            return Err(WorkspaceError::PatchApply("hunk failed".to_string()));
        }
        Ok(())
    }

    async fn diff(&self) -> Result<String, WorkspaceError> {
        Ok("diff --git a/frob.py b/frob.py\n".to_string())
    }

    async fn teardown(&mut self) {
        assert!(!self.torn_down, "teardown called twice");
        self.torn_down = true;
        self.observed.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Host-mode agent whose process is a fast no-op shell command.
struct NoopAgent {
    timeout: Duration,
    command: Vec<String>,
}

impl NoopAgent {
    fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            command: vec!["true".to_string()],
        }
    }

    fn sleepy() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            command: vec!["sleep".to_string(), "30".to_string()],
        }
    }
}

impl AgentAdapter for NoopAgent {
    fn name(&self) -> &str {
        "noop"
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

    fn configure(&mut self, _settings: &AgentSettings) {}

    fn build_command(&self, _instance: &EvalInstance, _workdir: &Path) -> Vec<String> {
        self.command.clone()
    }

    fn build_prompt(&self, instance: &EvalInstance) -> String {
        instance.problem_statement.clone()
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

fn instance(id: &str) -> EvalInstance {
    EvalInstance {
        instance_id: id.to_string(),
        dataset_name: "stub".to_string(),
        repo: "owner/repo".to_string(),
        base_commit: String::new(),
        problem_statement: "fix it".to_string(),
        hints_text: String::new(),
        test_patch: "diff --git a/tests/t.py b/tests/t.py\n".to_string(),
        gold_patch: String::new(),
        fail_to_pass: vec!["tests/t.py::test_bug".to_string()],
        pass_to_pass: Vec::new(),
        metadata: HashMap::new(),
    }
}

fn runner_with(
    faults: Faults,
    agent: NoopAgent,
    max_workers: usize,
    instance_ids: Vec<String>,
) -> (Runner, Arc<Observed>) {
    let observed = Arc::new(Observed::default());
    let provider = Arc::new(StubProvider {
        faults,
        observed: Arc::clone(&observed),
    });
    let mut config = RunConfig::default();
    config.max_workers = max_workers;
    config.dataset.instance_ids = instance_ids;

    let evaluator = Arc::from(create_evaluator("swe", Duration::from_secs(60)).unwrap());
    let runner = Runner::new(config, provider, Arc::new(agent), evaluator);
    (runner, observed)
}

fn passing_faults() -> Faults {
    Faults {
        test_output: "tests/t.py::test_bug PASSED".to_string(),
        test_exit_code: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn resolved_instance_runs_full_pipeline() {
    let (runner, observed) = runner_with(passing_faults(), NoopAgent::new(), 1, Vec::new());
    let summary = runner.run(vec![instance("i-1")]).await;

    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.results.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.eval_result.status, EvalStatus::Resolved);
    // Host mode collects the patch from the workspace diff.
    let output = result.agent_output.as_ref().unwrap();
    assert!(output.patch.starts_with("diff --git"));

    assert_eq!(observed.provisions.load(Ordering::SeqCst), 1);
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn provision_failure_is_error_without_teardown() {
    let faults = Faults {
        provision_fail: vec!["bad".to_string()],
        ..passing_faults()
    };
    let (runner, observed) = runner_with(faults, NoopAgent::new(), 1, Vec::new());
    let summary = runner.run(vec![instance("bad"), instance("good")]).await;

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.resolved, 1);
    let bad = summary
        .results
        .iter()
        .find(|r| r.instance.instance_id == "bad")
        .unwrap();
    assert_eq!(bad.eval_result.status, EvalStatus::Error);
    assert!(bad.eval_result.error_message.contains("Provisioning failed"));
    assert!(bad.agent_output.is_none());

    // Only the successfully provisioned workspace exists to tear down, and
    // the failed instance did not abort the run.
    assert_eq!(observed.provisions.load(Ordering::SeqCst), 1);
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn patch_conflict_is_error_with_teardown() {
    let faults = Faults {
        patch_fail: vec!["conflicted".to_string()],
        ..passing_faults()
    };
    let (runner, observed) = runner_with(faults, NoopAgent::new(), 1, Vec::new());
    let summary = runner.run(vec![instance("conflicted")]).await;

    let result = &summary.results[0];
    assert_eq!(result.eval_result.status, EvalStatus::Error);
    assert!(result.eval_result.error_message.contains("test patch"));
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn agent_timeout_is_timeout_with_teardown() {
    let (runner, observed) = runner_with(passing_faults(), NoopAgent::sleepy(), 1, Vec::new());
    let summary = runner.run(vec![instance("slow")]).await;

    let result = &summary.results[0];
    assert_eq!(result.eval_result.status, EvalStatus::Timeout);
    assert!(result.eval_result.error_message.contains("no patch collected"));
    assert!(result.agent_output.is_none());
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_timeout_is_timeout_with_teardown() {
    let faults = Faults {
        test_timeout: vec!["slow-tests".to_string()],
        ..passing_faults()
    };
    let (runner, observed) = runner_with(faults, NoopAgent::new(), 1, Vec::new());
    let summary = runner.run(vec![instance("slow-tests")]).await;

    assert_eq!(summary.timeouts, 1);
    assert_eq!(
        summary.results[0].eval_result.status,
        EvalStatus::Timeout
    );
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn filtered_instances_are_skipped_before_provisioning() {
    let (runner, observed) = runner_with(
        passing_faults(),
        NoopAgent::new(),
        1,
        vec!["wanted".to_string()],
    );
    let summary = runner
        .run(vec![instance("wanted"), instance("unwanted")])
        .await;

    assert_eq!(summary.total_instances, 2);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.skipped, 1);
    let skipped = summary
        .results
        .iter()
        .find(|r| r.instance.instance_id == "unwanted")
        .unwrap();
    assert_eq!(skipped.eval_result.status, EvalStatus::Skipped);

    // The skipped instance never reached the provider.
    assert_eq!(observed.provisions.load(Ordering::SeqCst), 1);
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_instances_get_private_workspaces() {
    let instances: Vec<_> = (0..8).map(|i| instance(&format!("par-{i}"))).collect();
    let (runner, observed) = runner_with(passing_faults(), NoopAgent::new(), 4, Vec::new());
    let summary = runner.run(instances).await;

    assert_eq!(summary.resolved, 8);
    assert_eq!(observed.provisions.load(Ordering::SeqCst), 8);
    assert_eq!(observed.teardowns.load(Ordering::SeqCst), 8);

    // Every workspace path is unique: no cross-instance contamination.
    let mut paths = observed.paths.lock().unwrap().clone();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8);
}

#[tokio::test]
async fn failing_tests_yield_failed_status() {
    let faults = Faults {
        test_output: "tests/t.py::test_bug FAILED".to_string(),
        test_exit_code: 1,
        ..Default::default()
    };
    let (runner, _) = runner_with(faults, NoopAgent::new(), 1, Vec::new());
    let summary = runner.run(vec![instance("still-broken")]).await;

    assert_eq!(summary.failed, 1);
    let result = &summary.results[0];
    assert_eq!(result.eval_result.status, EvalStatus::Failed);
    assert!(!result.eval_result.resolved);
    assert_eq!(result.eval_result.fail_to_pass_results.len(), 1);
}
