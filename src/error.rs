//! Error types for fixeval subsystems.
//!
//! Each subsystem has its own enum. Errors raised inside one instance's
//! pipeline are caught at the instance boundary and converted into a terminal
//! result; only [`ConfigError`] and [`DatasetError`] are fatal to a run, and
//! both are surfaced before any instance work begins.

use std::time::Duration;

use thiserror::Error;

/// Errors from workspace provisioning and in-workspace execution.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Clone, checkout, container start, or dependency install failed.
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// A unified diff could not be applied cleanly.
    #[error("Patch apply failed: {0}")]
    PatchApply(String),

    /// A command exceeded its per-call wall-clock budget.
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Command spawning or output capture failed.
    #[error("Execution failed: {0}")]
    Exec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{0}' not found")]
    NotFound(String),

    #[error("Failed to spawn agent process: {0}")]
    Spawn(String),

    /// The agent exceeded its configured time budget. The process tree was
    /// killed; this is recorded as a timeout, not an agent bug.
    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from configuration loading. Fatal to the whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown agent: '{0}'")]
    UnknownAgent(String),

    #[error("Unknown dataset: '{0}'")]
    UnknownDataset(String),

    #[error("Unknown evaluator: '{0}'")]
    UnknownEvaluator(String),

    #[error("Unknown reporter: '{0}'")]
    UnknownReporter(String),

    #[error("Unknown workspace kind: '{0}' (expected 'docker' or 'host')")]
    UnknownWorkspace(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors from dataset loading. Fatal to the whole run.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse dataset '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from reporting.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
