//! nbworker core - client for a long-lived out-of-process notebook worker.
//!
//! The worker is a Julia process that executes notebook cells. It is started
//! on demand, advertises itself through a transport file, and is driven over
//! a signed, newline-framed JSON protocol on a loopback TCP socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use nbworker_core::{ExecuteOptions, ExecutionMode, MappedDocument, WorkerClient};
//!
//! #[tokio::main]
//! async fn main() -> nbworker_core::Result<()> {
//!     let client = WorkerClient::from_env()?;
//!
//!     let text = std::fs::read_to_string("report.qmd")?;
//!     let markdown = MappedDocument::from_file("report.qmd".as_ref(), &text);
//!     let options = ExecuteOptions::new("report.qmd", markdown).with_mode(ExecutionMode::detect());
//!
//!     let notebook = client.execute(&options).await?;
//!     println!("{}", notebook);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod process;
pub mod source_ranges;
pub mod transport;

pub use api::{ExecuteOptions, ExecutionMode, WorkerClient, WorkerClientBuilder};
pub use config::WorkerSettings;
pub use connection::ConnectionManager;
pub use error::{Result, WorkerError};
pub use ipc::{Command, CommandKind, ProgressUpdate, Response, WorkerConnection};
pub use process::{ProcessLauncher, SpawnSpec, StartOutcome, WorkerEnvironment, WorkerLauncher};
pub use source_ranges::{build_source_ranges, MappedDocument, MappedLine, SourcePosition, SourceRange};
pub use transport::{SharedSecret, TransportDescriptor, TransportFile};
