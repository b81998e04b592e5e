//! TCP client for a single worker connection.
//!
//! A connection is opened for one logical operation, passes the `isready`
//! handshake, carries one command at a time and is dropped when the operation
//! completes.

use super::framing::FrameReader;
use super::protocol::{encode_command, Command, CommandKind, Empty, ErrorFrame, ProgressUpdate, Response};
use crate::error::{Result, WorkerError};
use crate::transport::{SharedSecret, TransportDescriptor};
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Receives progress notifications while `run` executes.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&ProgressUpdate) + Send);

/// A live connection to a worker that has answered the readiness check.
#[derive(Debug)]
pub struct WorkerConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    key: SharedSecret,
    port: u16,
}

impl WorkerConnection {
    /// Connect to the worker advertised by `descriptor` and perform the handshake.
    ///
    /// The worker must answer `isready` with literally `true` within `ready_timeout`.
    pub async fn connect(descriptor: &TransportDescriptor, ready_timeout: Duration) -> Result<Self> {
        let port = descriptor.port;
        let stream = TcpStream::connect(descriptor.addr()?)
            .await
            .map_err(|source| WorkerError::Connect { port, source })?;
        let (read_half, write_half) = stream.into_split();
        let mut connection = Self {
            reader: FrameReader::new(read_half),
            writer: write_half,
            key: descriptor.key.clone(),
            port,
        };

        debug!("Connected to worker on port {} (PID {})", port, descriptor.pid);

        let ready = tokio::time::timeout(
            ready_timeout,
            connection.request_value(&Command::IsReady(Empty {}), None),
        )
        .await
        .map_err(|_| WorkerError::ReadinessTimeout {
            port,
            timeout: ready_timeout,
        })??;

        if ready != Value::Bool(true) {
            return Err(WorkerError::ReadinessRejected {
                port,
                response: ready.to_string(),
            });
        }
        Ok(connection)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a command and decode its terminal response.
    pub async fn request(&mut self, command: &Command) -> Result<Response> {
        let value = self.request_value(command, None).await?;
        Response::decode(command.kind(), value)
    }

    /// Send a command, forwarding progress frames of `run` to `progress`.
    pub async fn request_with_progress(
        &mut self,
        command: &Command,
        progress: ProgressCallback<'_>,
    ) -> Result<Response> {
        let value = self.request_value(command, Some(progress)).await?;
        Response::decode(command.kind(), value)
    }

    /// Send a command and return the raw terminal frame.
    pub async fn request_value(
        &mut self,
        command: &Command,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> Result<Value> {
        let kind = command.kind();
        let message = encode_command(command, self.key.as_bytes())?;
        debug!("Writing \"{}\" command to worker", kind);
        self.writer.write_all(&message).await?;

        loop {
            let value = self.read_value(kind).await?;
            if let Some(frame) = ErrorFrame::from_value(&value) {
                return Err(frame.into_error(kind));
            }
            if kind.streams_progress() && ProgressUpdate::is_progress_frame(&value) {
                let update: ProgressUpdate = serde_json::from_value(value).map_err(|e| {
                    WorkerError::UnexpectedResponse {
                        command: kind,
                        message: format!("Malformed progress update: {}", e),
                    }
                })?;
                debug!(
                    "Progress update {}/{}, waiting for further responses",
                    update.chunk_index, update.n_chunks
                );
                if let Some(callback) = progress.as_deref_mut() {
                    callback(&update);
                }
                continue;
            }
            debug!("Received response to \"{}\"", kind);
            return Ok(value);
        }
    }

    async fn read_value(&mut self, kind: CommandKind) -> Result<Value> {
        let frame = self
            .reader
            .next_frame()
            .await?
            .ok_or(WorkerError::ConnectionClosed { command: kind })?;
        serde_json::from_slice(&frame).map_err(|e| WorkerError::UnexpectedResponse {
            command: kind,
            message: format!("Invalid JSON frame: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{verify_signature, FileTarget, RunRequest, SignedMessage};
    use serde_json::{json, Map};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    const KEY: &str = "test-key";

    fn descriptor(port: u16) -> TransportDescriptor {
        TransportDescriptor {
            port,
            pid: std::process::id(),
            key: SharedSecret::new(KEY),
            version_info: Map::new(),
        }
    }

    /// Accept one connection, answer each incoming line with the next scripted
    /// chunk of raw bytes, and return the command types received. An empty
    /// reply reads the command without answering.
    async fn scripted_worker(replies: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut received = Vec::new();
            for reply in replies {
                let Some(line) = lines.next_line().await.unwrap() else {
                    break;
                };
                let message: SignedMessage = serde_json::from_str(&line).unwrap();
                assert!(verify_signature(KEY.as_bytes(), message.payload.as_bytes(), &message.hmac));
                let payload: Value = serde_json::from_str(&message.payload).unwrap();
                received.push(payload["type"].as_str().unwrap().to_string());
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_connect_and_query() {
        let (port, worker) = scripted_worker(vec!["true\n", "false\n"]).await;
        let mut conn = WorkerConnection::connect(&descriptor(port), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(conn.port(), port);

        let response = conn
            .request(&Command::IsOpen(FileTarget::new("/doc.qmd")))
            .await
            .unwrap();
        assert_eq!(response, Response::IsOpen(false));
        assert_eq!(worker.await.unwrap(), vec!["isready", "isopen"]);
    }

    #[tokio::test]
    async fn test_readiness_must_be_literal_true() {
        let (port, _worker) = scripted_worker(vec!["\"true\"\n"]).await;
        match WorkerConnection::connect(&descriptor(port), Duration::from_secs(5)).await {
            Err(WorkerError::ReadinessRejected { response, .. }) => {
                assert_eq!(response, "\"true\"")
            }
            other => panic!("Expected ReadinessRejected, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_frames_only_reach_run_callback() {
        let (port, _worker) = scripted_worker(vec![
            "true\n",
            concat!(
                "{\"type\":\"progress_update\",\"chunkIndex\":1,\"nChunks\":2,\"source\":\"a\",\"line\":3}\n",
                "{\"type\":\"progress_update\",\"chunkIndex\":2,\"nChunks\":2,\"source\":\"b\",\"line\":9}\n",
                "{\"notebook\":{\"cells\":[]}}\n"
            ),
        ])
        .await;
        let mut conn = WorkerConnection::connect(&descriptor(port), Duration::from_secs(5))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut record = |update: &ProgressUpdate| seen.push(update.chunk_index);
        let response = conn
            .request_with_progress(
                &Command::Run(RunRequest {
                    file: "/doc.qmd".into(),
                    options: json!({}),
                    source_ranges: vec![],
                }),
                &mut record,
            )
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(
            response,
            Response::Run {
                notebook: json!({"cells": []})
            }
        );
    }

    #[tokio::test]
    async fn test_error_frame_becomes_protocol_error() {
        let (port, _worker) = scripted_worker(vec![
            "true\n",
            "{\"error\":\"file not open\",\"juliaError\":\"KeyError\"}\n",
        ])
        .await;
        let mut conn = WorkerConnection::connect(&descriptor(port), Duration::from_secs(5))
            .await
            .unwrap();

        match conn.request(&Command::close("/doc.qmd", false)).await {
            Err(WorkerError::Protocol {
                command,
                message,
                detail,
            }) => {
                assert_eq!(command, CommandKind::Close);
                assert_eq!(message, "file not open");
                assert_eq!(detail.as_deref(), Some("KeyError"));
            }
            other => panic!("Expected Protocol error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_socket_is_reported() {
        let (port, _worker) = scripted_worker(vec!["true\n", ""]).await;
        let mut conn = WorkerConnection::connect(&descriptor(port), Duration::from_secs(5))
            .await
            .unwrap();

        match conn.request(&Command::Status(Empty {})).await {
            Err(WorkerError::ConnectionClosed { command }) => assert_eq!(command, CommandKind::Status),
            other => panic!("Expected ConnectionClosed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = WorkerConnection::connect(&descriptor(port), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(WorkerError::Connect { .. })));
    }
}
