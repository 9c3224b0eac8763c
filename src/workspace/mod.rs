//! Isolated, instance-scoped execution environments.
//!
//! A [`Workspace`] owns one private filesystem area (and, for the docker
//! variant, one live container) for exactly one instance's lifetime. The
//! runner provisions it, the agent and the evaluator execute inside it, and
//! teardown is guaranteed on every path out of the pipeline.
//!
//! Variants are selected through [`provider_for`] by the configuration
//! string, never by type inspection.

pub mod docker;
pub mod host;
pub mod install;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::WorkspaceSettings;
use crate::error::{ConfigError, WorkspaceError};
use crate::model::EvalInstance;

pub use docker::DockerWorkspaceProvider;
pub use host::HostWorkspaceProvider;

/// Output of a command run inside a workspace.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An isolated environment for one in-flight instance.
///
/// Never shared across instances. Each `run` call gets its own timeout
/// budget; an expired call kills the underlying process tree and returns
/// [`WorkspaceError::CommandTimeout`] without poisoning the workspace.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Identifier of the instance this workspace belongs to.
    fn instance_id(&self) -> &str;

    /// Host-side path of the working tree.
    fn host_path(&self) -> &Path;

    /// Executes a shell command inside the isolated environment.
    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecOutput, WorkspaceError>;

    /// Applies a unified diff to the working tree. An empty patch is a
    /// successful no-op; a conflicting patch reports failure rather than
    /// leaving a half-applied tree silently treated as success.
    async fn apply_patch(&self, patch: &str) -> Result<(), WorkspaceError>;

    /// Returns the current diff of the working tree against the base
    /// revision.
    async fn diff(&self) -> Result<String, WorkspaceError>;

    /// Releases the environment. Safe to call exactly once; never fails, and
    /// fully reclaims partial state.
    async fn teardown(&mut self);
}

/// Provisions workspaces of one concrete variant.
///
/// Safe to call concurrently for different instances: every workspace gets a
/// uniquely named temp directory (and container) so paths never collide.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Configuration string this provider is registered under.
    fn kind(&self) -> &'static str;

    /// Materializes the target repository at the base revision inside a
    /// fresh, private area and installs the project's dependencies. A clone,
    /// checkout, or install failure yields [`WorkspaceError::Provision`].
    async fn provision(
        &self,
        instance: &EvalInstance,
    ) -> Result<Box<dyn Workspace>, WorkspaceError>;
}

/// Looks up the workspace provider for the configured kind.
pub fn provider_for(
    settings: &WorkspaceSettings,
) -> Result<Arc<dyn WorkspaceProvider>, ConfigError> {
    match settings.kind.as_str() {
        "docker" => Ok(Arc::new(DockerWorkspaceProvider::new(settings.clone()))),
        "host" => Ok(Arc::new(HostWorkspaceProvider::new(settings.clone()))),
        other => Err(ConfigError::UnknownWorkspace(other.to_string())),
    }
}

/// Runs a host-side process with a hard wall-clock timeout.
///
/// On expiry the child (and, via `kill_on_drop`, anything still attached to
/// its handle) is killed before returning. Shared by both workspace variants
/// and the runner's host-mode agent invocation path.
pub(crate) async fn run_with_timeout(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdin_data: Option<&str>,
    timeout: Duration,
) -> Result<ExecOutput, WorkspaceError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| WorkspaceError::Exec(format!("failed to spawn {program}: {e}")))?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| WorkspaceError::Exec(format!("failed to write stdin: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| WorkspaceError::Exec(format!("failed to close stdin: {e}")))?;
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                output: combined,
            })
        }
        Ok(Err(e)) => Err(WorkspaceError::Exec(format!("{program} failed: {e}"))),
        // wait_with_output consumed the child; kill_on_drop reaps the
        // process tree when the future is dropped here.
        Err(_) => Err(WorkspaceError::CommandTimeout(timeout)),
    }
}

/// Clones the instance's repository into `dest` and checks out the base
/// commit. Instances may override the clone URL via a `repo_url` metadata
/// entry (used for local bundles in tests).
pub(crate) async fn clone_repo(
    instance: &EvalInstance,
    dest: &Path,
    timeout: Duration,
) -> Result<(), WorkspaceError> {
    let repo_url = instance
        .metadata
        .get("repo_url")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://github.com/{}.git", instance.repo));

    tracing::info!(instance = %instance.instance_id, url = %repo_url, "Cloning repository");

    // Full clone: base commits can be far back in history.
    let dest_str = dest.to_string_lossy();
    let clone = run_with_timeout("git", &["clone", &repo_url, &dest_str], None, None, timeout)
        .await
        .map_err(provision_from)?;
    if !clone.success() {
        return Err(WorkspaceError::Provision(format!(
            "git clone of {} failed: {}",
            instance.repo,
            tail(&clone.output, 500)
        )));
    }

    if !instance.base_commit.is_empty() {
        let checkout = run_with_timeout(
            "git",
            &["checkout", "--force", &instance.base_commit],
            Some(dest),
            None,
            timeout,
        )
        .await
        .map_err(provision_from)?;
        if !checkout.success() {
            return Err(WorkspaceError::Provision(format!(
                "checkout of {} failed: {}",
                instance.base_commit,
                tail(&checkout.output, 500)
            )));
        }
    }

    Ok(())
}

/// Reclassifies timeout/exec failures during provisioning as provisioning
/// failures, so the runner maps them all to a terminal `error` result.
pub(crate) fn provision_from(err: WorkspaceError) -> WorkspaceError {
    match err {
        WorkspaceError::CommandTimeout(d) => {
            WorkspaceError::Provision(format!("command timed out after {d:?}"))
        }
        WorkspaceError::Exec(msg) => WorkspaceError::Provision(msg),
        other => other,
    }
}

/// Last `max` bytes of a string, on a char boundary.
pub(crate) fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Filesystem-safe name derived from an instance id.
pub(crate) fn safe_name(instance_id: &str) -> String {
    instance_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
