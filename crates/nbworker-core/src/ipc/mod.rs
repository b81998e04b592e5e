//! Signed line-framed protocol spoken with the worker over loopback TCP.
//!
//! # Architecture
//!
//! - **Protocol**: command/response types, signing and error frames
//! - **Framing**: newline splitting with carry-over between reads
//! - **Client**: one connection, one command in flight at a time

pub mod client;
pub mod framing;
pub mod protocol;

pub use client::{ProgressCallback, WorkerConnection};
pub use framing::FrameReader;
pub use protocol::{Command, CommandKind, ProgressUpdate, Response};
