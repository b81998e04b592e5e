//! Wire protocol types and message signing.
//!
//! Every outbound message is one line of JSON:
//!
//! ```text
//! {"hmac":"<base64 HMAC-SHA256(key, payload)>","payload":"<json {type, content}>"}\n
//! ```
//!
//! Inbound lines are the worker's raw response objects. A line carrying a
//! string `error` field is a failure, a line tagged `progress_update` is an
//! intermediate notification for `run`, anything else is the terminal answer.

use crate::error::{Result, WorkerError};
use crate::source_ranges::SourceRange;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const PROGRESS_UPDATE_TAG: &str = "progress_update";

/// Content of commands that address one notebook file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTarget {
    pub file: String,
}

impl FileTarget {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into() }
    }
}

/// Content of commands without arguments; serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Content of the `run` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub file: String,
    /// Render options forwarded to the worker untouched.
    pub options: Value,
    pub source_ranges: Vec<SourceRange>,
}

/// A request to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Command {
    Run(RunRequest),
    Close(FileTarget),
    ForceClose(FileTarget),
    IsOpen(FileTarget),
    IsReady(Empty),
    Status(Empty),
    Stop(Empty),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Run(_) => CommandKind::Run,
            Command::Close(_) => CommandKind::Close,
            Command::ForceClose(_) => CommandKind::ForceClose,
            Command::IsOpen(_) => CommandKind::IsOpen,
            Command::IsReady(_) => CommandKind::IsReady,
            Command::Status(_) => CommandKind::Status,
            Command::Stop(_) => CommandKind::Stop,
        }
    }

    /// `close` or `forceclose` depending on `force`.
    pub fn close(file: impl Into<String>, force: bool) -> Self {
        let target = FileTarget::new(file);
        if force {
            Command::ForceClose(target)
        } else {
            Command::Close(target)
        }
    }
}

/// Command tag without its content, used for error reporting and response decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Run,
    Close,
    ForceClose,
    IsOpen,
    IsReady,
    Status,
    Stop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Run => "run",
            CommandKind::Close => "close",
            CommandKind::ForceClose => "forceclose",
            CommandKind::IsOpen => "isopen",
            CommandKind::IsReady => "isready",
            CommandKind::Status => "status",
            CommandKind::Stop => "stop",
        }
    }

    /// Only `run` may be preceded by progress notifications.
    pub fn streams_progress(&self) -> bool {
        matches!(self, CommandKind::Run)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed envelope written to the socket.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignedMessage {
    pub hmac: String,
    pub payload: String,
}

/// Base64 HMAC-SHA256 of `payload` under `key`.
pub fn sign(key: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| WorkerError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a base64 signature against `payload` in constant time.
pub fn verify_signature(key: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Serialize, sign and newline-terminate a command.
pub fn encode_command(command: &Command, key: &[u8]) -> Result<Vec<u8>> {
    let payload = serde_json::to_string(command)?;
    let hmac = sign(key, payload.as_bytes())?;
    let mut line = serde_json::to_vec(&SignedMessage { hmac, payload })?;
    line.push(b'\n');
    Ok(line)
}

/// Intermediate notification sent while `run` executes cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub chunk_index: u32,
    pub n_chunks: u32,
    pub source: String,
    pub line: u32,
}

impl ProgressUpdate {
    pub fn is_progress_frame(value: &Value) -> bool {
        value.get("type").and_then(Value::as_str) == Some(PROGRESS_UPDATE_TAG)
    }
}

/// Failure reported by the worker in place of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(rename = "juliaError", default, skip_serializing_if = "Option::is_none")]
    pub worker_error: Option<String>,
}

impl ErrorFrame {
    /// Extract an error frame if `value` has a string `error` field.
    pub fn from_value(value: &Value) -> Option<Self> {
        let error = value.get("error")?.as_str()?.to_string();
        let worker_error = value
            .get("juliaError")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            error,
            worker_error,
        })
    }

    pub fn into_error(self, command: CommandKind) -> WorkerError {
        WorkerError::Protocol {
            command,
            message: self.error,
            detail: self.worker_error,
        }
    }
}

/// Terminal answer to a command, one variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Run { notebook: Value },
    Close { status: bool },
    ForceClose { status: bool },
    IsOpen(bool),
    IsReady(bool),
    Status(String),
    Stop { message: String },
}

#[derive(Deserialize)]
struct NotebookBody {
    notebook: Value,
}

#[derive(Deserialize)]
struct StatusBody {
    status: bool,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

impl Response {
    /// Decode the terminal frame of `command`.
    pub fn decode(command: CommandKind, value: Value) -> Result<Self> {
        let unexpected = |e: serde_json::Error| WorkerError::UnexpectedResponse {
            command,
            message: e.to_string(),
        };
        let response = match command {
            CommandKind::Run => {
                let body: NotebookBody = serde_json::from_value(value).map_err(unexpected)?;
                Response::Run {
                    notebook: body.notebook,
                }
            }
            CommandKind::Close => {
                let body: StatusBody = serde_json::from_value(value).map_err(unexpected)?;
                Response::Close {
                    status: body.status,
                }
            }
            CommandKind::ForceClose => {
                let body: StatusBody = serde_json::from_value(value).map_err(unexpected)?;
                Response::ForceClose {
                    status: body.status,
                }
            }
            CommandKind::IsOpen => {
                Response::IsOpen(serde_json::from_value(value).map_err(unexpected)?)
            }
            CommandKind::IsReady => {
                Response::IsReady(serde_json::from_value(value).map_err(unexpected)?)
            }
            CommandKind::Status => {
                Response::Status(serde_json::from_value(value).map_err(unexpected)?)
            }
            CommandKind::Stop => {
                let body: MessageBody = serde_json::from_value(value).map_err(unexpected)?;
                Response::Stop {
                    message: body.message,
                }
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shapes() {
        let cases = [
            (Command::IsReady(Empty {}), json!({"type": "isready", "content": {}})),
            (Command::Status(Empty {}), json!({"type": "status", "content": {}})),
            (Command::Stop(Empty {}), json!({"type": "stop", "content": {}})),
            (
                Command::IsOpen(FileTarget::new("/doc.qmd")),
                json!({"type": "isopen", "content": {"file": "/doc.qmd"}}),
            ),
            (
                Command::close("/doc.qmd", true),
                json!({"type": "forceclose", "content": {"file": "/doc.qmd"}}),
            ),
            (
                Command::close("/doc.qmd", false),
                json!({"type": "close", "content": {"file": "/doc.qmd"}}),
            ),
        ];
        for (command, expected) in cases {
            assert_eq!(serde_json::to_value(&command).unwrap(), expected);
        }
    }

    #[test]
    fn test_run_content_is_camel_case() {
        let command = Command::Run(RunRequest {
            file: "/doc.qmd".into(),
            options: json!({"fig-width": 7}),
            source_ranges: vec![SourceRange::unmapped(1, 2)],
        });
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "run");
        assert_eq!(value["content"]["options"]["fig-width"], 7);
        assert_eq!(value["content"]["sourceRanges"], json!([{"lines": [1, 2]}]));
    }

    #[test]
    fn test_encoded_message_signature_verifies() {
        let key = b"0123456789abcdef";
        let line = encode_command(&Command::IsReady(Empty {}), key).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let message: SignedMessage = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(message.payload, r#"{"type":"isready","content":{}}"#);
        assert_eq!(message.hmac, sign(key, message.payload.as_bytes()).unwrap());
        assert!(verify_signature(key, message.payload.as_bytes(), &message.hmac));
        assert!(!verify_signature(b"other key", message.payload.as_bytes(), &message.hmac));
    }

    #[test]
    fn test_sign_matches_known_vector() {
        // RFC 4231 test case 2
        let mac = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(mac, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_error_frame_detection() {
        let frame = ErrorFrame::from_value(&json!({"error": "bad", "juliaError": "trace"})).unwrap();
        assert_eq!(frame.error, "bad");
        assert_eq!(frame.worker_error.as_deref(), Some("trace"));

        assert!(ErrorFrame::from_value(&json!({"error": 3})).is_none());
        assert!(ErrorFrame::from_value(&json!({"notebook": {}})).is_none());
        assert!(ErrorFrame::from_value(&json!(true)).is_none());
    }

    #[test]
    fn test_progress_frame_detection() {
        let value = json!({
            "type": "progress_update",
            "chunkIndex": 2,
            "nChunks": 5,
            "source": "x = 1",
            "line": 12
        });
        assert!(ProgressUpdate::is_progress_frame(&value));
        let update: ProgressUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(update.chunk_index, 2);
        assert_eq!(update.n_chunks, 5);
        assert!(!ProgressUpdate::is_progress_frame(&json!({"notebook": {}})));
    }

    #[test]
    fn test_response_decode() {
        assert_eq!(
            Response::decode(CommandKind::Run, json!({"notebook": {"cells": []}})).unwrap(),
            Response::Run {
                notebook: json!({"cells": []})
            }
        );
        assert_eq!(
            Response::decode(CommandKind::IsOpen, json!(false)).unwrap(),
            Response::IsOpen(false)
        );
        assert_eq!(
            Response::decode(CommandKind::Stop, json!({"message": "Server stopped."})).unwrap(),
            Response::Stop {
                message: "Server stopped.".into()
            }
        );
        assert!(matches!(
            Response::decode(CommandKind::Close, json!("nope")),
            Err(WorkerError::UnexpectedResponse {
                command: CommandKind::Close,
                ..
            })
        ));
    }
}
