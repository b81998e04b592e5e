//! Starting the worker, or deciding to reuse the one already advertised.

use super::environment::WorkerEnvironment;
use super::launcher::{ProcessLauncher, SpawnSpec};
use crate::config::{EnvConfig, PathsConfig, WorkerSettings};
use crate::error::Result;
use crate::platform;
use crate::transport::TransportFile;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether [`WorkerLauncher::start_or_reuse`] found an advertised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub reused: bool,
}

/// Starts the worker process when no transport file advertises one.
#[derive(Clone)]
pub struct WorkerLauncher {
    settings: WorkerSettings,
    environment: Arc<dyn WorkerEnvironment>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl WorkerLauncher {
    pub fn new(
        settings: WorkerSettings,
        environment: Arc<dyn WorkerEnvironment>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            settings,
            environment,
            launcher,
        }
    }

    /// Reuse the advertised worker or spawn a new one.
    ///
    /// An existing transport file is trusted without a liveness check; the
    /// connection manager discovers stale files when the handshake fails.
    pub async fn start_or_reuse(&self) -> Result<StartOutcome> {
        let transport = TransportFile::new(self.settings.transport_file());
        if transport.exists().await {
            debug!("Transport file {} exists, reusing worker", transport.path().display());
            return Ok(StartOutcome { reused: true });
        }

        info!("Starting worker process. This might take a while...");
        let project = self.environment.prepare().await?;
        let spec = worker_spawn_spec(&self.settings, &project);
        self.launcher.spawn_detached(&spec).await?;
        debug!("Worker handed off, waiting for transport file");
        Ok(StartOutcome { reused: false })
    }
}

/// Command line of the worker: runner script, transport file and log file,
/// with the user's global package environment hidden.
pub fn worker_spawn_spec(settings: &WorkerSettings, project: &Path) -> SpawnSpec {
    SpawnSpec::new(&settings.executable)
        .with_arg("--startup-file=no")
        .with_arg(format!("--project={}", project.display()))
        .with_arg(path_arg(&settings.resource(PathsConfig::RUNNER_SCRIPT)))
        .with_arg(path_arg(&settings.transport_file()))
        .with_arg(path_arg(&settings.log_file()))
        .with_env(EnvConfig::LOAD_PATH, platform::load_path_isolation())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
