//! Host-local workspace.
//!
//! No container: isolation comes from a private temp directory and a
//! per-instance virtualenv. Commands run through `bash -c` with the venv
//! first on `PATH`, so `python` and `pytest` resolve inside the workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::WorkspaceSettings;
use crate::error::WorkspaceError;
use crate::model::EvalInstance;
use crate::workspace::install::install_commands;
use crate::workspace::{
    clone_repo, provision_from, run_with_timeout, safe_name, tail, ExecOutput, Workspace,
    WorkspaceProvider,
};

/// Provisions [`HostWorkspace`]s.
pub struct HostWorkspaceProvider {
    settings: WorkspaceSettings,
}

impl HostWorkspaceProvider {
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WorkspaceProvider for HostWorkspaceProvider {
    fn kind(&self) -> &'static str {
        "host"
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

        clone_repo(instance, &host_path, provision_timeout).await?;

        let mut workspace = HostWorkspace {
            instance_id: instance.instance_id.clone(),
            host_path,
            venv_dir: String::new(),
            temp_dir: Some(temp_dir),
        };
        workspace.venv_dir = workspace
            .host_path
            .join(".venv")
            .to_string_lossy()
            .to_string();

        // Private dependency environment instead of container isolation.
        if let Err(e) = create_venv(&workspace, provision_timeout).await {
            workspace.teardown().await;
            return Err(e);
        }

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
            path = %workspace.host_path.display(),
            "Host workspace ready"
        );
        Ok(Box::new(workspace))
    }
}

async fn create_venv(workspace: &HostWorkspace, timeout: Duration) -> Result<(), WorkspaceError> {
    let venv = run_with_timeout(
        "python3",
        &["-m", "venv", &workspace.venv_dir],
        Some(&workspace.host_path),
        None,
        timeout,
    )
    .await
    .map_err(provision_from)?;
    if !venv.success() {
        return Err(WorkspaceError::Provision(format!(
            "venv creation failed: {}",
            tail(&venv.output, 500)
        )));
    }

    // Old pip versions mishandle editable installs of older projects.
    let upgrade = workspace
        .run("pip install --upgrade pip setuptools wheel", timeout)
        .await
        .map_err(provision_from)?;
    if !upgrade.success() {
        return Err(WorkspaceError::Provision(format!(
            "pip upgrade failed: {}",
            tail(&upgrade.output, 500)
        )));
    }
    Ok(())
}

/// Workspace that runs everything directly on the host.
pub struct HostWorkspace {
    instance_id: String,
    host_path: PathBuf,
    venv_dir: String,
    temp_dir: Option<TempDir>,
}

#[async_trait]
impl Workspace for HostWorkspace {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn host_path(&self) -> &Path {
        &self.host_path
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecOutput, WorkspaceError> {
        // Activate the venv by prefixing PATH rather than sourcing a script.
        let wrapped = format!(
            "export PATH='{venv}/bin':\"$PATH\" VIRTUAL_ENV='{venv}'; {command}",
            venv = self.venv_dir,
        );
        run_with_timeout(
            "bash",
            &["-c", &wrapped],
            Some(&self.host_path),
            None,
            timeout,
        )
        .await
    }

    async fn apply_patch(&self, patch: &str) -> Result<(), WorkspaceError> {
        if patch.trim().is_empty() {
            return Ok(());
        }

        let mut result = run_with_timeout(
            "git",
            &["apply", "--allow-empty", "-"],
            Some(&self.host_path),
            Some(patch),
            Duration::from_secs(60),
        )
        .await?;

        if !result.success() {
            result = run_with_timeout(
                "git",
                &["apply", "--3way", "-"],
                Some(&self.host_path),
                Some(patch),
                Duration::from_secs(60),
            )
            .await?;
        }

        if result.success() {
            Ok(())
        } else {
            Err(WorkspaceError::PatchApply(tail(&result.output, 500).to_string()))
        }
    }

    async fn diff(&self) -> Result<String, WorkspaceError> {
        let result = run_with_timeout(
            "git",
            &["diff"],
            Some(&self.host_path),
            None,
            Duration::from_secs(60),
        )
        .await?;
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
        if let Some(dir) = self.temp_dir.take() {
            if let Err(e) = dir.close() {
                warn!(instance = %self.instance_id, error = %e, "Failed to remove workspace dir");
            }
        }
        debug!(instance = %self.instance_id, "Host workspace torn down");
    }
}
