//! Run configuration.
//!
//! Loaded from YAML, optionally overridden from the CLI. Validated before any
//! instance work begins; a bad config is the only error class that aborts a
//! whole run.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the agent adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Registered agent name ("claude-code", "aider", "subprocess").
    pub name: String,
    /// Timeout for one invocation, in seconds.
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// Model to use, if the agent supports one.
    #[serde(default)]
    pub model: String,
    /// Environment variables for the agent process. Empty value = unset.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Free-form agent-specific options.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_agent_timeout() -> u64 {
    600
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "claude-code".to_string(),
            timeout_secs: default_agent_timeout(),
            model: String::new(),
            env: Vec::new(),
            options: HashMap::new(),
        }
    }
}

impl AgentSettings {
    /// Invocation timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns a string option by key, if present.
    pub fn str_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Returns an integer option by key, if present.
    pub fn int_option(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.as_i64())
    }
}

/// Configuration for the dataset source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// Registered dataset name ("file").
    pub name: String,
    /// Path to the dataset file, for file-backed datasets.
    #[serde(default)]
    pub path: String,
    /// Only run these instance identifiers (empty = all).
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Truncate to this many instances.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            name: "file".to_string(),
            path: String::new(),
            instance_ids: Vec::new(),
            limit: None,
        }
    }
}

/// Configuration for workspace isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Isolation kind: "docker" or "host".
    #[serde(default = "default_workspace_kind")]
    pub kind: String,
    /// Docker image for containerized workspaces.
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory limit passed to the container runtime.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Timeout for provisioning commands (clone, install), in seconds.
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_secs: u64,
    /// Timeout for one test batch, in seconds.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
    /// Whether to tear workspaces down after each instance. Disable only for
    /// debugging a single failing instance.
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

fn default_workspace_kind() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_memory_limit() -> String {
    "4g".to_string()
}

fn default_provision_timeout() -> u64 {
    900
}

fn default_test_timeout() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            kind: default_workspace_kind(),
            image: default_image(),
            memory_limit: default_memory_limit(),
            provision_timeout_secs: default_provision_timeout(),
            test_timeout_secs: default_test_timeout(),
            cleanup: true,
        }
    }
}

impl WorkspaceSettings {
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    /// Registered evaluator name.
    #[serde(default = "default_evaluator")]
    pub evaluator: String,
    /// Registered reporter names, applied in order.
    #[serde(default = "default_reporters")]
    pub reporters: Vec<String>,
    /// Directory where run artifacts are written.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Maximum number of concurrently in-flight instances. 1 = sequential.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Default log filter (overridden by RUST_LOG).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_evaluator() -> String {
    "swe".to_string()
}

fn default_reporters() -> Vec<String> {
    vec!["console".to_string(), "json".to_string()]
}

fn default_results_dir() -> String {
    "results".to_string()
}

fn default_max_workers() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetSettings::default(),
            agent: AgentSettings::default(),
            workspace: WorkspaceSettings::default(),
            evaluator: default_evaluator(),
            reporters: default_reporters(),
            results_dir: default_results_dir(),
            max_workers: default_max_workers(),
            log_level: default_log_level(),
        }
    }
}

impl RunConfig {
    /// Loads configuration from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.workspace.kind != "docker" && self.workspace.kind != "host" {
            return Err(ConfigError::UnknownWorkspace(self.workspace.kind.clone()));
        }
        Ok(())
    }

    /// Applies CLI overrides on top of the file-loaded config.
    pub fn apply_overrides(
        &mut self,
        agent: Option<String>,
        dataset_path: Option<String>,
        instance_ids: Vec<String>,
        limit: Option<usize>,
        max_workers: Option<usize>,
    ) {
        if let Some(agent) = agent {
            self.agent.name = agent;
        }
        if let Some(path) = dataset_path {
            self.dataset.path = path;
        }
        if !instance_ids.is_empty() {
            self.dataset.instance_ids = instance_ids;
        }
        if let Some(limit) = limit {
            self.dataset.limit = Some(limit);
        }
        if let Some(workers) = max_workers {
            self.max_workers = workers;
        }
    }
}
