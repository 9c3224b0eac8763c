//! fixeval: an evaluation harness for autonomous bug-fixing agents.
//!
//! For each instance the pipeline provisions an isolated workspace, invokes
//! the configured agent against the problem statement, collects the patch,
//! applies the held-out tests, and aggregates per-instance results into a run
//! summary. Instances run independently across a bounded worker pool; a
//! failure in one never aborts the run.

pub mod agent;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod patch;
pub mod report;
pub mod runner;
pub mod workspace;

pub use error::{AgentError, ConfigError, DatasetError, ReportError, WorkspaceError};
pub use model::{
    AgentOutput, EvalInstance, EvalResult, EvalStatus, ExecutionMode, InstanceRunResult,
    RunSummary, TestOutcome, TestVerdict,
};
