//! Core data model for evaluation runs.
//!
//! Everything downstream of the dataset consumes these types: an immutable
//! [`EvalInstance`] flows through the workspace and agent stages, producing an
//! [`AgentOutput`], which the evaluator turns into an [`EvalResult`]. Results
//! are aggregated into a [`RunSummary`] in completion order.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an agent executes relative to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Agent process edits files directly on the host side of the workspace;
    /// the patch is collected via `git diff` afterwards.
    Host,
    /// Agent process runs inside the isolated environment; its own textual
    /// output is the source of the patch.
    Container,
}

/// A single evaluation instance from a dataset. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalInstance {
    /// Unique identifier within a run.
    pub instance_id: String,
    /// Name of the dataset this instance came from.
    #[serde(default)]
    pub dataset_name: String,
    /// Repository coordinates, `owner/name` form.
    pub repo: String,
    /// Base revision the repository is checked out at.
    #[serde(default)]
    pub base_commit: String,
    /// Natural-language description of the defect.
    pub problem_statement: String,
    /// Optional hint text shown to the agent.
    #[serde(default)]
    pub hints_text: String,
    /// Held-out test patch (unified diff) applied before evaluation.
    #[serde(default)]
    pub test_patch: String,
    /// Reference patch that fixes the defect.
    #[serde(default)]
    pub gold_patch: String,
    /// Tests that must flip from failing to passing.
    #[serde(default)]
    pub fail_to_pass: Vec<String>,
    /// Tests that must remain passing.
    #[serde(default)]
    pub pass_to_pass: Vec<String>,
    /// Open key/value metadata bag.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Output produced by one agent invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Instance this output belongs to.
    pub instance_id: String,
    /// Name of the agent that produced it.
    pub agent_name: String,
    /// Emitted patch text. May be empty for host-mode agents, in which case
    /// the runner collects the patch from the workspace diff.
    #[serde(default)]
    pub patch: String,
    /// Process exit code. Non-zero is not automatically a failure.
    pub exit_code: i32,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// Dollar cost reported by the agent, if any.
    pub cost_usd: Option<f64>,
    /// Total tokens reported by the agent, if any.
    pub tokens_used: Option<u64>,
    /// Model name reported by the agent, if any.
    pub model_name: Option<String>,
    /// Agent-specific extras (session ids, turn counts, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentOutput {
    /// Creates an output with the mandatory fields set.
    pub fn new(
        agent_name: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            instance_id: String::new(),
            agent_name: agent_name.into(),
            patch: String::new(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration,
            cost_usd: None,
            tokens_used: None,
            model_name: None,
            metadata: HashMap::new(),
        }
    }

    /// Sets the patch text.
    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.patch = patch.into();
        self
    }
}

/// Verdict for a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Passed,
    Failed,
    /// The test never produced a verdict (infrastructure error, batch abort).
    NotRun,
}

/// Result of one test within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Canonical test identifier from the instance record.
    pub test_name: String,
    /// Tri-state verdict.
    pub verdict: TestVerdict,
    /// Tail of the runner output, for diagnostics.
    #[serde(default)]
    pub output: String,
}

impl TestOutcome {
    pub fn new(test_name: impl Into<String>, verdict: TestVerdict) -> Self {
        Self {
            test_name: test_name.into(),
            verdict,
            output: String::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn passed(&self) -> bool {
        self.verdict == TestVerdict::Passed
    }
}

/// Terminal status of one instance's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    /// Every fail_to_pass and pass_to_pass test passed.
    Resolved,
    /// Tests ran to completion but at least one did not pass.
    Failed,
    /// An infrastructure problem prevented a verdict.
    Error,
    /// The agent or the test run exceeded its time budget.
    Timeout,
    /// The instance was excluded before provisioning began.
    Skipped,
}

impl std::fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalStatus::Resolved => write!(f, "resolved"),
            EvalStatus::Failed => write!(f, "failed"),
            EvalStatus::Error => write!(f, "error"),
            EvalStatus::Timeout => write!(f, "timeout"),
            EvalStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of evaluating one instance. Created exactly once, immutable after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub instance_id: String,
    pub status: EvalStatus,
    #[serde(default)]
    pub fail_to_pass_results: Vec<TestOutcome>,
    #[serde(default)]
    pub pass_to_pass_results: Vec<TestOutcome>,
    /// True iff every test in both lists passed. Empty lists are vacuously
    /// satisfied.
    pub resolved: bool,
    #[serde(default)]
    pub error_message: String,
    pub duration: Duration,
    /// Carries evaluator annotations such as `parse_ambiguity`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EvalResult {
    /// Creates a terminal result with no test outcomes (error, timeout,
    /// skipped). Used by the runner when a stage fails before evaluation.
    pub fn terminal(
        instance_id: impl Into<String>,
        status: EvalStatus,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            status,
            fail_to_pass_results: Vec::new(),
            pass_to_pass_results: Vec::new(),
            resolved: false,
            error_message: error_message.into(),
            duration: Duration::ZERO,
            metadata: HashMap::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Complete record for one instance: the record itself plus everything the
/// pipeline produced for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRunResult {
    pub instance: EvalInstance,
    pub agent_output: Option<AgentOutput>,
    pub eval_result: EvalResult,
}

impl InstanceRunResult {
    pub fn resolved(&self) -> bool {
        self.eval_result.resolved
    }
}

/// Aggregate over all results of a run. Built incrementally as instances
/// complete; finalized once all workers are done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dataset_name: String,
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_instances: usize,
    pub resolved: usize,
    pub failed: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub skipped: usize,
    /// Per-instance results in completion order, not submission order.
    pub results: Vec<InstanceRunResult>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RunSummary {
    /// Creates an empty summary for a run that is about to start.
    pub fn new(
        run_id: impl Into<String>,
        dataset_name: impl Into<String>,
        agent_name: impl Into<String>,
        total_instances: usize,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            dataset_name: dataset_name.into(),
            agent_name: agent_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            total_instances,
            resolved: 0,
            failed: 0,
            errors: 0,
            timeouts: 0,
            skipped: 0,
            results: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Appends a completed result and bumps the matching status counter.
    pub fn record(&mut self, result: InstanceRunResult) {
        if result.eval_result.resolved {
            self.resolved += 1;
        } else {
            match result.eval_result.status {
                EvalStatus::Error => self.errors += 1,
                EvalStatus::Timeout => self.timeouts += 1,
                EvalStatus::Skipped => self.skipped += 1,
                _ => self.failed += 1,
            }
        }
        self.results.push(result);
    }

    /// Fraction of instances whose result is resolved.
    pub fn resolve_rate(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        self.resolved as f64 / self.total_instances as f64
    }

    /// Marks the run as finished.
    pub fn finalize(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Flattens the summary into the plain key/value record that reporters
    /// and downstream tooling consume. This schema is the durable contract.
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id,
            "dataset_name": self.dataset_name,
            "agent_name": self.agent_name,
            "started_at": self.started_at.to_rfc3339(),
            "completed_at": self.completed_at.map(|t| t.to_rfc3339()),
            "total_instances": self.total_instances,
            "resolved": self.resolved,
            "failed": self.failed,
            "errors": self.errors,
            "timeouts": self.timeouts,
            "skipped": self.skipped,
            "resolve_rate": self.resolve_rate(),
            "results": self.results.iter().map(|r| {
                serde_json::json!({
                    "instance_id": r.instance.instance_id,
                    "status": r.eval_result.status.to_string(),
                    "resolved": r.eval_result.resolved,
                    "agent_duration_secs": r.agent_output.as_ref().map(|a| a.duration.as_secs_f64()),
                    "eval_duration_secs": r.eval_result.duration.as_secs_f64(),
                    "cost_usd": r.agent_output.as_ref().and_then(|a| a.cost_usd),
                    "error_message": r.eval_result.error_message,
                })
            }).collect::<Vec<_>>(),
            "metadata": self.metadata,
        })
    }
}
