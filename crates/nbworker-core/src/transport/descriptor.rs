//! Transport descriptor parsing and transport file access.

use crate::config::{DiscoveryConfig, ProtocolConfig};
use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Key shared between the worker and its clients for message signing.
///
/// `Debug` never prints the key so descriptors can be logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Contents of the transport file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub port: u16,
    pub pid: u32,
    pub key: SharedSecret,
    /// `juliaVersion`, `environment`, `runnerVersion` and anything else the worker reports.
    #[serde(flatten)]
    pub version_info: Map<String, Value>,
}

impl TransportDescriptor {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", ProtocolConfig::LOOPBACK_HOST, self.port)
            .parse()
            .map_err(|e| WorkerError::Internal(format!("Invalid loopback address: {}", e)))
    }

    /// A string entry of the version metadata, e.g. `runnerVersion`.
    pub fn version_field(&self, name: &str) -> Option<&str> {
        self.version_info.get(name).and_then(Value::as_str)
    }
}

/// Handle to the transport file at a fixed path.
#[derive(Debug, Clone)]
pub struct TransportFile {
    path: PathBuf,
}

impl TransportFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Read and parse the descriptor.
    ///
    /// The worker may still be writing when the file first appears, so the
    /// file is re-read until it ends with a newline.
    pub async fn read(&self) -> Result<TransportDescriptor> {
        let mut content = self.read_text().await?;
        let mut retries = 0;
        while !content.ends_with('\n') && retries < DiscoveryConfig::READ_RETRIES {
            tokio::time::sleep(DiscoveryConfig::READ_RETRY_INTERVAL).await;
            content = self.read_text().await?;
            retries += 1;
        }
        if !content.ends_with('\n') {
            return Err(WorkerError::IncompleteDescriptor {
                path: self.path.clone(),
                retries,
            });
        }

        let descriptor: TransportDescriptor = serde_json::from_str(content.trim_end()).map_err(|e| {
            WorkerError::Json {
                message: format!("Invalid transport file {}: {}", self.path.display(), e),
                source: Some(e),
            }
        })?;
        debug!(
            "Read transport file: port {}, pid {}",
            descriptor.port, descriptor.pid
        );
        Ok(descriptor)
    }

    /// The descriptor, or `None` when no worker has advertised itself.
    pub async fn read_if_present(&self) -> Result<Option<TransportDescriptor>> {
        if !self.exists().await {
            return Ok(None);
        }
        self.read().await.map(Some)
    }

    /// Wait for the file to appear, then read it.
    ///
    /// Check `n` (counting from zero) is followed by a wait of `n` backoff steps.
    pub async fn poll(&self, max_attempts: u32) -> Result<TransportDescriptor> {
        for attempt in 0..max_attempts {
            if self.exists().await {
                return self.read().await;
            }
            debug!("Transport file does not exist yet (attempt {})", attempt + 1);
            tokio::time::sleep(DiscoveryConfig::POLL_BACKOFF_STEP * attempt).await;
        }
        Err(WorkerError::DiscoveryTimeout {
            path: self.path.clone(),
            attempts: max_attempts,
        })
    }

    /// Delete the file. A file that is already gone is not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed transport file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkerError::io_with_path(e, &self.path)),
        }
    }

    async fn read_text(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| WorkerError::io_with_path(e, &self.path))
    }
}
