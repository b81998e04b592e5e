//! Error types for the notebook worker client.
//!
//! Every failure surfaces to the caller as a [`WorkerError`]. The only failure
//! absorbed internally is a single stale transport file, which the connection
//! manager deletes and retries once.

use crate::ipc::protocol::CommandKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the worker client.
#[derive(Debug, Error)]
pub enum WorkerError {
    // Launch errors
    #[error("Failed to start worker process: {stderr}")]
    SpawnFailed { stderr: String },

    #[error("Worker environment is not usable: {message}")]
    EnvironmentFailed { message: String },

    // Discovery errors
    #[error("Worker did not write transport file {path:?} after {attempts} attempts")]
    DiscoveryTimeout { path: PathBuf, attempts: u32 },

    #[error("Transport file {path:?} is still incomplete after {retries} re-reads")]
    IncompleteDescriptor { path: PathBuf, retries: u32 },

    // Connection errors
    #[error("Could not connect to worker on port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker on port {port} did not report ready within {timeout:?}")]
    ReadinessTimeout { port: u16, timeout: Duration },

    #[error("Worker on port {port} answered the readiness check with {response}")]
    ReadinessRejected { port: u16, response: String },

    // Protocol errors
    #[error("{}", protocol_message(.command, .message, .detail))]
    Protocol {
        command: CommandKind,
        message: String,
        detail: Option<String>,
    },

    #[error("Worker closed the connection before answering \"{command}\"")]
    ConnectionClosed { command: CommandKind },

    #[error("Unexpected response to \"{command}\": {message}")]
    UnexpectedResponse { command: CommandKind, message: String },

    // Lifecycle errors
    #[error("Worker failed to start: {source}")]
    StartupFailed {
        #[source]
        source: Box<WorkerError>,
        /// Contents of the worker log at the time of failure, if readable.
        log: Option<String>,
    },

    #[error("Worker server not running.")]
    ServerNotRunning,

    #[error("Found transport file but can't connect to control server: {source}")]
    ServerUnreachable {
        #[source]
        source: Box<WorkerError>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn protocol_message(command: &CommandKind, message: &str, detail: &Option<String>) -> String {
    let mut text = format!(
        "Worker returned error after receiving \"{}\" command:\n\n{}",
        command, message
    );
    if let Some(detail) = detail {
        text.push_str("\n\nThe underlying worker error was:\n\n");
        text.push_str(detail);
    }
    text
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl WorkerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        WorkerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Worker log captured when a freshly spawned worker could not be reached.
    pub fn worker_log(&self) -> Option<&str> {
        match self {
            WorkerError::StartupFailed { log, .. } => log.as_deref(),
            _ => None,
        }
    }

    /// Whether the socket is still in a consistent state after this error.
    ///
    /// The worker reports command failures with an error frame, after which
    /// the connection can carry another command.
    pub fn leaves_connection_usable(&self) -> bool {
        matches!(self, WorkerError::Protocol { .. })
    }
}
