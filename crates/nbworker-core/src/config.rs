//! Centralized configuration for the worker client.
//!
//! Compile-time constants live in the unit structs below. Settings that vary
//! per host (worker executable, runtime directory, custom project) live in
//! [`WorkerSettings`], which is read from the environment.

use crate::error::Result;
use crate::platform;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport file discovery.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    pub const MAX_POLL_ATTEMPTS: u32 = 15;
    /// Wait before check `n` is `n * POLL_BACKOFF_STEP`.
    pub const POLL_BACKOFF_STEP: Duration = Duration::from_millis(100);
    pub const READ_RETRIES: u32 = 20;
    pub const READ_RETRY_INTERVAL: Duration = Duration::from_millis(100);
}

/// Wire protocol settings.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
    pub const READ_CHUNK_SIZE: usize = 512;
    pub const LOOPBACK_HOST: &'static str = "127.0.0.1";
}

/// Connection manager settings.
pub struct ConnectionConfig;

impl ConnectionConfig {
    /// One pass for the existing worker, one for a fresh spawn after a stale transport file.
    pub const MAX_CONNECT_PASSES: u32 = 2;
}

/// File and directory names.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "nbworker";
    pub const RUNTIME_SUBDIR: &'static str = "julia";
    pub const TRANSPORT_FILE: &'static str = "julia_transport.txt";
    pub const LOG_FILE: &'static str = "julia_server_log.txt";
    pub const PROJECT_FILE: &'static str = "Project.toml";
    pub const RUNNER_SCRIPT: &'static str = "quartonotebookrunner.jl";
    pub const ENSURE_ENV_SCRIPT: &'static str = "ensure_environment.jl";
}

/// Environment variable names.
pub struct EnvConfig;

impl EnvConfig {
    pub const JULIA_EXECUTABLE: &'static str = "NBWORKER_JULIA";
    pub const JULIA_PROJECT: &'static str = "NBWORKER_JULIA_PROJECT";
    pub const RUNTIME_DIR: &'static str = "NBWORKER_RUNTIME_DIR";
    pub const RESOURCE_DIR: &'static str = "NBWORKER_RESOURCES";
    pub const LOAD_PATH: &'static str = "JULIA_LOAD_PATH";
    pub const CI: &'static str = "CI";
    pub const COLUMNS: &'static str = "COLUMNS";
}

pub const DEFAULT_JULIA_EXECUTABLE: &str = "julia";
pub const DEFAULT_RUNNER_PACKAGE: &str = "QuartoNotebookRunner";
pub const DEFAULT_CONSOLE_WIDTH: usize = 80;

/// Host-specific settings for locating and starting the worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Julia executable, a bare name resolved on `PATH` or an absolute path.
    pub executable: PathBuf,
    /// User-supplied project that must already provide the runner package.
    pub project: Option<PathBuf>,
    /// Directory holding the transport file, the worker log and the managed environment.
    pub runtime_dir: PathBuf,
    /// Directory holding the bundled runner scripts and the project template.
    pub resource_dir: PathBuf,
    pub runner_package: String,
    pub discovery_attempts: u32,
    pub ready_timeout: Duration,
}

impl WorkerSettings {
    /// Settings rooted at `runtime_dir` with every other value at its default.
    pub fn new(runtime_dir: impl Into<PathBuf>, resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_JULIA_EXECUTABLE),
            project: None,
            runtime_dir: runtime_dir.into(),
            resource_dir: resource_dir.into(),
            runner_package: DEFAULT_RUNNER_PACKAGE.to_string(),
            discovery_attempts: DiscoveryConfig::MAX_POLL_ATTEMPTS,
            ready_timeout: ProtocolConfig::READY_TIMEOUT,
        }
    }

    /// Read settings from the process environment.
    ///
    /// Empty variables are treated as unset.
    pub fn from_env() -> Result<Self> {
        let runtime_dir = match non_empty_var(EnvConfig::RUNTIME_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => platform::default_runtime_dir()?,
        };
        let resource_dir = match non_empty_var(EnvConfig::RESOURCE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => platform::default_resource_dir()?,
        };

        let mut settings = Self::new(runtime_dir, resource_dir);
        if let Some(exe) = non_empty_var(EnvConfig::JULIA_EXECUTABLE) {
            settings.executable = PathBuf::from(exe);
        }
        settings.project = non_empty_var(EnvConfig::JULIA_PROJECT).map(PathBuf::from);
        Ok(settings)
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_project(mut self, project: impl Into<PathBuf>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = attempts;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn transport_file(&self) -> PathBuf {
        self.runtime_dir.join(PathsConfig::TRANSPORT_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.runtime_dir.join(PathsConfig::LOG_FILE)
    }

    /// Directory of the environment managed on the user's behalf.
    pub fn managed_env_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn resource(&self, name: impl AsRef<Path>) -> PathBuf {
        self.resource_dir.join(name)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
