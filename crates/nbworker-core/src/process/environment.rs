//! Resolution of the project environment the worker runs in.

use crate::config::{EnvConfig, PathsConfig, WorkerSettings};
use crate::error::{Result, WorkerError};
use crate::platform;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info};

/// Provides a project directory in which the runner package can be loaded.
#[async_trait]
pub trait WorkerEnvironment: Send + Sync {
    /// Make the environment usable and return its project path.
    ///
    /// Runs before every fresh spawn. Failures abort the launch.
    async fn prepare(&self) -> Result<PathBuf>;
}

/// Uses the user's project when one is configured, otherwise manages a
/// project in the runtime directory.
#[derive(Debug, Clone)]
pub struct ProjectEnvironment {
    settings: WorkerSettings,
}

impl ProjectEnvironment {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }

    /// Check that the runner package loads in a user-supplied project.
    async fn verify_custom(&self, project: PathBuf) -> Result<PathBuf> {
        let project_arg = forward_slashes(&project);
        info!(
            "Custom project set via {}=\"{}\", checking that {} loads",
            EnvConfig::JULIA_PROJECT,
            project_arg,
            self.settings.runner_package
        );
        let status = tokio::process::Command::new(&self.settings.executable)
            .arg("--startup-file=no")
            .arg(format!("--project={}", project_arg))
            .arg("-e")
            .arg(format!("using {}", self.settings.runner_package))
            .env(EnvConfig::LOAD_PATH, platform::load_path_isolation())
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| WorkerError::EnvironmentFailed {
                message: format!("Could not run {}: {}", self.settings.executable.display(), e),
            })?;

        if !status.success() {
            return Err(WorkerError::EnvironmentFailed {
                message: format!(
                    "Executing `using {}` failed with {}=\"{}\". Ensure that this project exists, has {} installed and is instantiated correctly.",
                    self.settings.runner_package,
                    EnvConfig::JULIA_PROJECT,
                    project_arg,
                    self.settings.runner_package
                ),
            });
        }
        debug!("{} loaded successfully", self.settings.runner_package);
        Ok(PathBuf::from(project_arg))
    }

    /// Refresh the managed project from the bundled template and instantiate it.
    async fn ensure_managed(&self) -> Result<PathBuf> {
        let project_dir = self.settings.managed_env_dir().to_path_buf();
        tokio::fs::create_dir_all(&project_dir)
            .await
            .map_err(|e| WorkerError::io_with_path(e, &project_dir))?;

        let template = self.settings.resource(PathsConfig::PROJECT_FILE);
        let project_toml = project_dir.join(PathsConfig::PROJECT_FILE);
        tokio::fs::copy(&template, &project_toml)
            .await
            .map_err(|e| WorkerError::io_with_path(e, &template))?;

        info!("Ensuring worker environment in {}", project_dir.display());
        let status = tokio::process::Command::new(&self.settings.executable)
            .arg("--startup-file=no")
            .arg(format!("--project={}", project_dir.display()))
            .arg(self.settings.resource(PathsConfig::ENSURE_ENV_SCRIPT))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| WorkerError::EnvironmentFailed {
                message: format!("Could not run {}: {}", self.settings.executable.display(), e),
            })?;

        if !status.success() {
            return Err(WorkerError::EnvironmentFailed {
                message: "Ensuring an updated worker environment failed".to_string(),
            });
        }
        Ok(project_dir)
    }
}

#[async_trait]
impl WorkerEnvironment for ProjectEnvironment {
    async fn prepare(&self) -> Result<PathBuf> {
        match &self.settings.project {
            Some(project) => self.verify_custom(project.clone()).await,
            None => self.ensure_managed().await,
        }
    }
}

/// Julia accepts either separator, and forward slashes survive shell quoting on Windows.
fn forward_slashes(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
