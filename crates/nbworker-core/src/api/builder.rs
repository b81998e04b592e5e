//! Builder for configuring a [`WorkerClient`].

use crate::api::WorkerClient;
use crate::config::WorkerSettings;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::process::{platform_launcher, ProcessLauncher, ProjectEnvironment, WorkerEnvironment, WorkerLauncher};
use std::sync::Arc;

/// Builder for configuring a [`WorkerClient`].
///
/// # Example
///
/// ```rust,ignore
/// use nbworker_core::{WorkerClient, WorkerSettings};
///
/// let client = WorkerClient::builder()
///     .settings(WorkerSettings::from_env()?.with_discovery_attempts(20))
///     .build()?;
/// ```
#[derive(Default)]
pub struct WorkerClientBuilder {
    settings: Option<WorkerSettings>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    environment: Option<Arc<dyn WorkerEnvironment>>,
}

impl WorkerClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings to use.
    ///
    /// Default: [`WorkerSettings::from_env`]
    pub fn settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// How the worker process is spawned.
    ///
    /// Default: PowerShell `Start-Process` on Windows, a new session elsewhere
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// How the worker's project environment is prepared before a spawn.
    ///
    /// Default: [`ProjectEnvironment`] over the client's settings
    pub fn environment(mut self, environment: Arc<dyn WorkerEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn build(self) -> Result<WorkerClient> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => WorkerSettings::from_env()?,
        };
        let launcher = self.launcher.unwrap_or_else(platform_launcher);
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(ProjectEnvironment::new(settings.clone())));

        let worker_launcher = WorkerLauncher::new(settings.clone(), environment, launcher);
        let connections = ConnectionManager::new(settings.clone(), worker_launcher);
        Ok(WorkerClient::from_parts(settings, connections))
    }
}
