//! Obtaining a ready connection, starting the worker if needed.
//!
//! A transport file can outlive its worker (crash, reboot, `kill -9`). When a
//! reused worker fails the readiness check, the file is deleted and the whole
//! start/discover/connect flow runs once more, which then spawns a fresh
//! worker. Failures of a freshly spawned worker are never retried.

use crate::config::{ConnectionConfig, WorkerSettings};
use crate::error::{Result, WorkerError};
use crate::ipc::WorkerConnection;
use crate::process::WorkerLauncher;
use crate::transport::TransportFile;
use tracing::{debug, info, warn};

/// Runs the launch, discovery and handshake sequence.
#[derive(Clone)]
pub struct ConnectionManager {
    settings: WorkerSettings,
    launcher: WorkerLauncher,
}

impl ConnectionManager {
    pub fn new(settings: WorkerSettings, launcher: WorkerLauncher) -> Self {
        Self { settings, launcher }
    }

    pub fn transport_file(&self) -> TransportFile {
        TransportFile::new(self.settings.transport_file())
    }

    /// A connection that has passed the `isready` handshake.
    pub async fn get_connection(&self) -> Result<WorkerConnection> {
        let transport = self.transport_file();
        let max_passes = ConnectionConfig::MAX_CONNECT_PASSES;

        for pass in 1..=max_passes {
            let outcome = self.launcher.start_or_reuse().await?;

            let descriptor = match transport.poll(self.settings.discovery_attempts).await {
                Ok(descriptor) => descriptor,
                Err(e) if !outcome.reused => return Err(self.startup_failed(e).await),
                Err(e) => return Err(e),
            };
            if !outcome.reused {
                info!("Worker process started.");
            }

            debug!(
                "Connecting to worker at port {}, pid {}",
                descriptor.port, descriptor.pid
            );
            match WorkerConnection::connect(&descriptor, self.settings.ready_timeout).await {
                Ok(connection) => return Ok(connection),
                Err(e) if !outcome.reused => {
                    warn!("Connecting to worker failed although it wrote a transport file; the worker may be broken");
                    return Err(self.startup_failed(e).await);
                }
                Err(e) if pass < max_passes => {
                    warn!(
                        "Connecting to reused worker failed, transport file may be stale. Deleting it and retrying: {}",
                        e
                    );
                    transport.remove().await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(WorkerError::Internal(format!(
            "No worker connection after {} attempts",
            max_passes
        )))
    }

    /// Wrap a failure of a freshly spawned worker together with its log.
    async fn startup_failed(&self, source: WorkerError) -> WorkerError {
        let log_path = self.settings.log_file();
        let log = match tokio::fs::read_to_string(&log_path).await {
            Ok(log) => Some(log),
            Err(e) => {
                debug!("Worker log {} unreadable: {}", log_path.display(), e);
                None
            }
        };
        WorkerError::StartupFailed {
            source: Box::new(source),
            log,
        }
    }
}
