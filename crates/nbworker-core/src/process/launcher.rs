//! Detached process spawning.
//!
//! The worker must outlive the client that starts it. How that is achieved
//! differs per platform, so spawning goes through the [`ProcessLauncher`]
//! trait and tests substitute their own implementation.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{error, info};

/// Program, arguments and extra environment for a detached spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl SpawnSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Starts a process that keeps running after the caller exits.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the process and return once it has been handed off.
    ///
    /// Fails with [`WorkerError::SpawnFailed`] when the spawning step itself fails.
    async fn spawn_detached(&self, spec: &SpawnSpec) -> Result<()>;
}

/// Spawns the program directly in a new session with stdio detached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionLauncher;

#[async_trait]
impl ProcessLauncher for SessionLauncher {
    async fn spawn_detached(&self, spec: &SpawnSpec) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        start_new_session(&mut cmd);

        info!("Launching detached {}", spec.executable.display());
        match cmd.spawn() {
            Ok(child) => {
                info!("Launched worker with PID {:?}", child.id());
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn process: {}", e);
                Err(WorkerError::SpawnFailed {
                    stderr: format!("{}: {}", spec.executable.display(), e),
                })
            }
        }
    }
}

/// Make the child a session leader so terminal hangups and the parent's exit
/// do not reach it.
#[cfg(unix)]
#[allow(unsafe_code)]
fn start_new_session(cmd: &mut tokio::process::Command) {
    // SAFETY: setsid() is async-signal-safe and touches no memory of the
    // parent, so it may run between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Spawns through `PowerShell Start-Process -WindowStyle Hidden`.
///
/// Children started directly are not reliably orphaned on Windows, so
/// PowerShell starts the program and exits, and its exit status reports
/// whether the hand-off worked.
#[derive(Debug, Clone)]
pub struct PowerShellLauncher {
    shell: PathBuf,
}

impl Default for PowerShellLauncher {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("PowerShell"),
        }
    }
}

impl PowerShellLauncher {
    /// Arguments passed to PowerShell for `spec`.
    pub fn shell_args(spec: &SpawnSpec) -> Vec<String> {
        vec![
            "-Command".to_string(),
            "Start-Process".to_string(),
            spec.executable.to_string_lossy().into_owned(),
            "-ArgumentList".to_string(),
            argument_list(&spec.args),
            "-WindowStyle".to_string(),
            "Hidden".to_string(),
        ]
    }
}

/// Format arguments as `'"arg 1" "arg 2"'` for `Start-Process -ArgumentList`.
fn argument_list(args: &[String]) -> String {
    let inner = args
        .iter()
        .map(|arg| format!("\"{}\"", arg))
        .collect::<Vec<_>>()
        .join(" ");
    format!("'{}'", inner)
}

#[async_trait]
impl ProcessLauncher for PowerShellLauncher {
    async fn spawn_detached(&self, spec: &SpawnSpec) -> Result<()> {
        info!(
            "Starting detached {} through PowerShell",
            spec.executable.display()
        );
        let output = tokio::process::Command::new(&self.shell)
            .args(Self::shell_args(spec))
            .envs(&spec.env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| WorkerError::SpawnFailed {
                stderr: format!("{}: {}", self.shell.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("PowerShell Start-Process failed: {}", stderr);
            return Err(WorkerError::SpawnFailed { stderr });
        }
        Ok(())
    }
}

/// The launcher appropriate for the current platform.
pub fn platform_launcher() -> Arc<dyn ProcessLauncher> {
    if cfg!(windows) {
        Arc::new(PowerShellLauncher::default())
    } else {
        Arc::new(SessionLauncher)
    }
}
