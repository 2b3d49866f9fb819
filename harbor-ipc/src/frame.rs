//! Newline-delimited JSON framing.
//!
//! Chunks from a byte stream are buffered, split on `\n`, and each
//! complete non-blank line is handed to the caller. A single serialized
//! envelope never contains a raw newline, so one line is one frame.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{IpcError, IpcResult};

/// Maximum length of a single line (16 MiB). Longer lines are dropped.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Outbound lines queued ahead of the writer task.
const OUTBOUND_QUEUE: usize = 256;

/// Incremental splitter from byte chunks to complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed, in order.
    ///
    /// A trailing `\r` is stripped. Blank lines are skipped. Bytes after
    /// the last newline stay buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding || self.buffer.len() + head.len() > MAX_FRAME_SIZE {
                if !self.discarding {
                    warn!(
                        size = self.buffer.len() + head.len(),
                        max = MAX_FRAME_SIZE,
                        "dropping oversized line"
                    );
                }
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            if let Some(line) = finish_line(std::mem::take(&mut self.buffer)) {
                lines.push(line);
            }
        }

        if !rest.is_empty() && !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_FRAME_SIZE {
                warn!(
                    size = self.buffer.len(),
                    max = MAX_FRAME_SIZE,
                    "dropping oversized line"
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// Bytes buffered after the last complete line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes an unterminated trailing line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        finish_line(std::mem::take(&mut self.buffer))
    }
}

fn finish_line(mut bytes: Vec<u8>) -> Option<String> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    let line = String::from_utf8_lossy(&bytes).into_owned();
    if line.trim().is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Serializes a value as one newline-terminated line.
pub fn encode_frame<T: Serialize>(value: &T) -> IpcResult<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line; `None` when it is not valid JSON of the expected shape.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Option<T> {
    match serde_json::from_str(line.trim()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "line is not a frame");
            None
        }
    }
}

/// Handle to the single writer task that owns an output stream.
///
/// Frames are written whole and in the order they were queued, so
/// concurrent senders never interleave partial lines.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<String>,
}

impl FrameSink {
    /// Spawns the writer task. It stops when every sink clone is dropped
    /// or a write fails, closing the stream.
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(write_loop(writer, rx));
        Self { tx }
    }

    /// Queues one frame for writing.
    pub async fn send<T: Serialize>(&self, frame: &T) -> IpcResult<()> {
        let line = encode_frame(frame)?;
        self.tx
            .send(line)
            .await
            .map_err(|_| IpcError::ChannelClosed)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "frame writer failed, closing output");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
