//! Container-backed workspace.
//!
//! The repository is cloned into a private host directory which is
//! bind-mounted into an ephemeral container at `/testbed`; every command runs
//! inside the container via `docker exec`. The container plus the host
//! directory are reclaimed together on teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkspaceSettings;
use crate::error::WorkspaceError;
use crate::model::EvalInstance;
use crate::workspace::install::install_commands;
use crate::workspace::{
    clone_repo, provision_from, run_with_timeout, safe_name, tail, ExecOutput, Workspace,
    WorkspaceProvider,
};

const CONTAINER_WORKDIR: &str = "/testbed";

/// Provisions [`DockerWorkspace`]s.
pub struct DockerWorkspaceProvider {
    settings: WorkspaceSettings,
}

impl DockerWorkspaceProvider {
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WorkspaceProvider for DockerWorkspaceProvider {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn provision(
        &self,
        instance: &EvalInstance,
    ) -> Result<Box<dyn Workspace>, WorkspaceError> {
        let provision_timeout = self.settings.provision_timeout();
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("fixeval-{}-", safe_name(&instance.instance_id)))
            .tempdir()?;
        let host_path = temp_dir.path().to_path_buf();

        // Clone on the host side of the bind mount.
        clone_repo(instance, &host_path, provision_timeout).await?;

        let container_name = format!(
            "fixeval-{}-{}",
            safe_name(&instance.instance_id),
            &Uuid::new_v4().to_string()[..8]
        );

        let mut workspace = DockerWorkspace {
            instance_id: instance.instance_id.clone(),
            container_name: container_name.clone(),
            host_path,
            temp_dir: Some(temp_dir),
            container_started: false,
        };

        if let Err(e) = start_container(&mut workspace, &self.settings).await {
            workspace.teardown().await;
            return Err(e);
        }

        // Install the project and its test dependencies inside the container.
        let commands = install_commands(&instance.repo, workspace.host_path());
        for cmd in &commands {
            info!(instance = %instance.instance_id, command = %cmd, "Installing dependencies");
            let result = workspace
                .run(cmd, provision_timeout)
                .await
                .map_err(provision_from);
            match result {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    let err = WorkspaceError::Provision(format!(
                        "install command '{}' exited with {}: {}",
                        cmd,
                        out.exit_code,
                        tail(&out.output, 500)
                    ));
                    workspace.teardown().await;
                    return Err(err);
                }
                Err(e) => {
                    workspace.teardown().await;
                    return Err(e);
                }
            }
        }

        info!(
            instance = %instance.instance_id,
            container = %container_name,
            "Docker workspace ready"
        );
        Ok(Box::new(workspace))
    }
}

async fn start_container(
    workspace: &mut DockerWorkspace,
    settings: &WorkspaceSettings,
) -> Result<(), WorkspaceError> {
    // Remove a stale container with the same name, if any.
    let _ = run_with_timeout(
        "docker",
        &["rm", "-f", &workspace.container_name],
        None,
        None,
        Duration::from_secs(30),
    )
    .await;

    let mount = format!("{}:{}", workspace.host_path.display(), CONTAINER_WORKDIR);
    let memory = format!("--memory={}", settings.memory_limit);
    let run = run_with_timeout(
        "docker",
        &[
            "run",
            "-d",
            "--name",
            &workspace.container_name,
            &memory,
            "-v",
            &mount,
            "-w",
            CONTAINER_WORKDIR,
            &settings.image,
            "sleep",
            "infinity",
        ],
        None,
        None,
        Duration::from_secs(120),
    )
    .await
    .map_err(provision_from)?;

    if !run.success() {
        return Err(WorkspaceError::Provision(format!(
            "failed to start container '{}': {}",
            workspace.container_name,
            tail(&run.output, 500)
        )));
    }

    workspace.container_started = true;
    debug!(container = %workspace.container_name, "Container started");
    Ok(())
}

/// Workspace backed by a bind-mounted ephemeral container.
pub struct DockerWorkspace {
    instance_id: String,
    container_name: String,
    host_path: PathBuf,
    temp_dir: Option<TempDir>,
    container_started: bool,
}

#[async_trait]
impl Workspace for DockerWorkspace {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn host_path(&self) -> &Path {
        &self.host_path
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecOutput, WorkspaceError> {
        let result = run_with_timeout(
            "docker",
            &[
                "exec",
                "-w",
                CONTAINER_WORKDIR,
                &self.container_name,
                "bash",
                "-c",
                command,
            ],
            None,
            None,
            timeout,
        )
        .await;

        if matches!(result, Err(WorkspaceError::CommandTimeout(_))) {
            // Killing the docker exec client does not stop the command inside
            // the container; terminate whatever the command spawned there.
            let _ = run_with_timeout(
                "docker",
                &[
                    "exec",
                    &self.container_name,
                    "bash",
                    "-c",
                    "pkill -9 -P 1 || true",
                ],
                None,
                None,
                Duration::from_secs(10),
            )
            .await;
        }

        result
    }

    async fn apply_patch(&self, patch: &str) -> Result<(), WorkspaceError> {
        if patch.trim().is_empty() {
            return Ok(());
        }

        // Write the patch on the host side of the bind mount so the container
        // can read it without shell-escaping issues.
        let patch_file = self.host_path.join(".fixeval_patch.diff");
        tokio::fs::write(&patch_file, patch).await?;

        let apply_cmd = format!("git apply --allow-empty {CONTAINER_WORKDIR}/.fixeval_patch.diff");
        let mut result = self.run(&apply_cmd, Duration::from_secs(60)).await?;

        if !result.success() {
            let fallback = format!("git apply --3way {CONTAINER_WORKDIR}/.fixeval_patch.diff");
            result = self.run(&fallback, Duration::from_secs(60)).await?;
        }

        let _ = tokio::fs::remove_file(&patch_file).await;

        if result.success() {
            Ok(())
        } else {
            Err(WorkspaceError::PatchApply(tail(&result.output, 500).to_string()))
        }
    }

    async fn diff(&self) -> Result<String, WorkspaceError> {
        let result = self.run("git diff", Duration::from_secs(60)).await?;
        if result.success() {
            Ok(result.output)
        } else {
            Err(WorkspaceError::Exec(format!(
                "git diff failed: {}",
                tail(&result.output, 500)
            )))
        }
    }

    async fn teardown(&mut self) {
        if self.container_started {
            if let Err(e) = run_with_timeout(
                "docker",
                &["rm", "-f", &self.container_name],
                None,
                None,
                Duration::from_secs(60),
            )
            .await
            {
                warn!(container = %self.container_name, error = %e, "Failed to remove container");
            }
            self.container_started = false;
        }
        if let Some(dir) = self.temp_dir.take() {
            if let Err(e) = dir.close() {
                warn!(instance = %self.instance_id, error = %e, "Failed to remove workspace dir");
            }
        }
        debug!(instance = %self.instance_id, "Docker workspace torn down");
    }
}

impl Drop for DockerWorkspace {
    fn drop(&mut self) {
        // Best-effort sync backstop for workspaces dropped without teardown.
        if self.container_started {
            warn!(container = %self.container_name, "Workspace dropped without teardown");
            let name = self.container_name.clone();
            std::thread::spawn(move || {
                let _ = std::process::Command::new("docker")
                    .args(["rm", "-f", &name])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status();
            });
        }
    }
}
