//! Newline framing over a byte stream.
//!
//! The worker writes one JSON object per line. Reads return arbitrary slices
//! of that stream, so bytes after a newline are carried over to the next call.

use crate::config::ProtocolConfig;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits an async byte stream into newline-terminated frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    carry: Vec<u8>,
    /// Prefix of `carry` already known to contain no newline.
    scanned: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            carry: Vec::new(),
            scanned: 0,
        }
    }

    /// Next frame without its trailing newline.
    ///
    /// Returns `None` on a clean EOF between frames. EOF in the middle of a
    /// frame is an `UnexpectedEof` error. Blank lines are skipped.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; ProtocolConfig::READ_CHUNK_SIZE];
        loop {
            if let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let mut frame: Vec<u8> = self.carry.drain(..=end).collect();
                frame.pop();
                self.scanned = 0;
                if frame.is_empty() {
                    continue;
                }
                return Ok(Some(frame));
            }
            self.scanned = self.carry.len();

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.carry.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a {} byte frame", self.carry.len()),
                ));
            }
            self.carry.extend_from_slice(&chunk[..n]);
        }
    }

    /// Bytes received after the last returned frame.
    pub fn buffered(&self) -> &[u8] {
        &self.carry
    }

}
