//! Public client for the notebook worker.
//!
//! [`WorkerClient::execute`] is the only operation that starts a worker. The
//! administrative operations act on the worker advertised by the transport
//! file and fail with [`WorkerError::ServerNotRunning`] when there is none.

mod builder;
mod execute;
mod progress;

pub use builder::WorkerClientBuilder;
pub use execute::{ExecuteOptions, ExecutionMode};
pub use progress::{console_columns, first_significant_line, render_progress_line};

use crate::config::WorkerSettings;
use crate::connection::ConnectionManager;
use crate::error::{Result, WorkerError};
use crate::ipc::protocol::{Empty, FileTarget, RunRequest};
use crate::ipc::{Command, ProgressCallback, ProgressUpdate, Response, WorkerConnection};
use crate::platform;
use crate::source_ranges::SourceRange;
use crate::transport::TransportDescriptor;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Client for rendering documents through the worker and administering it.
#[derive(Clone)]
pub struct WorkerClient {
    settings: WorkerSettings,
    connections: ConnectionManager,
}

impl WorkerClient {
    pub fn builder() -> WorkerClientBuilder {
        WorkerClientBuilder::new()
    }

    /// Client configured from the environment with the platform launcher.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    pub(crate) fn from_parts(settings: WorkerSettings, connections: ConnectionManager) -> Self {
        Self {
            settings,
            connections,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Render a document, logging progress lines at INFO level.
    pub async fn execute(&self, options: &ExecuteOptions) -> Result<Value> {
        let columns = console_columns();
        let mut log_progress = |update: &ProgressUpdate| {
            info!("{}", render_progress_line(update, columns));
        };
        self.execute_with_progress(options, &mut log_progress).await
    }

    /// Render a document, passing progress notifications to `progress`.
    ///
    /// Returns the notebook produced by the worker. In one-shot mode the
    /// file's session is closed before running and again afterwards.
    pub async fn execute_with_progress(
        &self,
        options: &ExecuteOptions,
        progress: ProgressCallback<'_>,
    ) -> Result<Value> {
        let mut conn = self.connections.get_connection().await?;
        let file = absolute_file(&options.input)?;

        if options.closes_existing_session() {
            let open = conn.request(&Command::IsOpen(FileTarget::new(&file))).await?;
            if open == Response::IsOpen(true) {
                debug!("Closing existing session for {}", file);
                conn.request(&Command::close(&file, false)).await?;
            }
        }

        let run = Command::Run(RunRequest {
            file: file.clone(),
            options: options.render_options.clone(),
            source_ranges: absolute_ranges(options.markdown.source_ranges())?,
        });
        let notebook = match conn.request_with_progress(&run, progress).await {
            Ok(Response::Run { notebook }) => notebook,
            Ok(other) => return Err(mismatch(&run, other)),
            Err(e) => {
                if options.mode.is_one_shot() && e.leaves_connection_usable() {
                    close_after_failure(&mut conn, &file).await;
                }
                return Err(e);
            }
        };

        if options.mode.is_one_shot() {
            conn.request(&Command::close(&file, false)).await?;
        }
        Ok(notebook)
    }

    /// Status report of the running worker.
    pub async fn status(&self) -> Result<String> {
        let mut conn = self.connect_running().await?;
        let command = Command::Status(Empty {});
        match conn.request(&command).await? {
            Response::Status(text) => Ok(text),
            other => Err(mismatch(&command, other)),
        }
    }

    /// Send a termination signal to the worker process, bypassing the protocol.
    ///
    /// Returns the PID that was signalled.
    pub async fn kill(&self) -> Result<u32> {
        let descriptor = self.running_descriptor().await?;
        if !platform::is_process_alive(descriptor.pid) {
            warn!(
                "Transport file names PID {} but no such process exists",
                descriptor.pid
            );
            return Err(WorkerError::ServerNotRunning);
        }
        platform::send_terminate(descriptor.pid)?;
        info!("Sent SIGTERM to worker process {}", descriptor.pid);
        Ok(descriptor.pid)
    }

    /// Contents of the worker log, or `None` if the worker never wrote one.
    pub async fn server_log(&self) -> Result<Option<String>> {
        self.running_descriptor().await?;
        let path = self.settings.log_file();
        match tokio::fs::read_to_string(&path).await {
            Ok(log) => Ok(Some(log)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkerError::io_with_path(e, path)),
        }
    }

    /// Close the worker's session for `file`.
    ///
    /// A plain close lets a running render finish; `force` terminates it.
    pub async fn close(&self, file: &Path, force: bool) -> Result<()> {
        let file = absolute_file(file)?;
        let mut conn = self.connect_running().await?;
        let command = Command::close(&file, force);
        match conn.request(&command).await? {
            Response::Close { .. } | Response::ForceClose { .. } => Ok(()),
            other => Err(mismatch(&command, other)),
        }
    }

    /// Whether the worker holds a session for `file`.
    pub async fn is_open(&self, file: &Path) -> Result<bool> {
        let file = absolute_file(file)?;
        let mut conn = self.connect_running().await?;
        let command = Command::IsOpen(FileTarget::new(file));
        match conn.request(&command).await? {
            Response::IsOpen(open) => Ok(open),
            other => Err(mismatch(&command, other)),
        }
    }

    /// Ask the worker to close all sessions and exit. Fails if any session is busy.
    pub async fn stop(&self) -> Result<String> {
        let mut conn = self.connect_running().await?;
        let command = Command::Stop(Empty {});
        match conn.request(&command).await? {
            Response::Stop { message } => Ok(message),
            other => Err(mismatch(&command, other)),
        }
    }

    async fn running_descriptor(&self) -> Result<TransportDescriptor> {
        self.connections
            .transport_file()
            .read_if_present()
            .await?
            .ok_or(WorkerError::ServerNotRunning)
    }

    async fn connect_running(&self) -> Result<WorkerConnection> {
        let descriptor = self.running_descriptor().await?;
        WorkerConnection::connect(&descriptor, self.settings.ready_timeout)
            .await
            .map_err(|e| WorkerError::ServerUnreachable {
                source: Box::new(e),
            })
    }
}

/// Best-effort close so a failed one-shot render does not leave its session open.
async fn close_after_failure(conn: &mut WorkerConnection, file: &str) {
    if let Err(e) = conn.request(&Command::close(file, false)).await {
        warn!("Could not close session for {} after failed run: {}", file, e);
    }
}

fn mismatch(command: &Command, response: Response) -> WorkerError {
    WorkerError::UnexpectedResponse {
        command: command.kind(),
        message: format!("{:?}", response),
    }
}

/// Source ranges with each origin file resolved the same way as the run target.
fn absolute_ranges(ranges: Vec<SourceRange>) -> Result<Vec<SourceRange>> {
    ranges
        .into_iter()
        .map(|mut range| {
            if let Some(file) = range.file.take() {
                range.file = Some(absolute_file(Path::new(&file))?);
            }
            Ok(range)
        })
        .collect()
}

fn absolute_file(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.to_string_lossy().into_owned())
}
