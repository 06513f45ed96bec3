//! Newline-delimited JSON IPC with mpv.
//!
//! A reader task owns the read half and forwards parsed messages over a
//! channel; the client keeps the write half for commands.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::transport::IpcStream;

const EVENT_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("ipc write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message received from the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PropertyChange {
        id: Option<u64>,
        name: String,
        data: Value,
    },
    PlaybackRestart,
    FileLoaded,
    EndFile {
        reason: String,
        file_error: Option<String>,
    },
    /// Answer to one of our commands
    Reply {
        request_id: Option<u64>,
        error: String,
        data: Value,
    },
    /// An event we don't act on
    Other(String),
    /// A line that is neither an event nor a reply
    Unrecognized(String),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    event: Option<String>,
    name: Option<String>,
    #[serde(default)]
    data: Value,
    id: Option<u64>,
    reason: Option<String>,
    file_error: Option<String>,
    error: Option<String>,
    request_id: Option<u64>,
}

#[derive(Serialize)]
struct Command<'a> {
    command: &'a [Value],
    request_id: u64,
}

/// Parse one line of player output
pub fn parse_message(line: &str) -> PlayerEvent {
    let raw: RawMessage = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "unparseable ipc message");
            return PlayerEvent::Unrecognized(line.to_string());
        }
    };

    match raw.event.as_deref() {
        Some("property-change") => match raw.name {
            Some(name) => PlayerEvent::PropertyChange {
                id: raw.id,
                name,
                data: raw.data,
            },
            None => PlayerEvent::Unrecognized(line.to_string()),
        },
        Some("playback-restart") => PlayerEvent::PlaybackRestart,
        Some("file-loaded") => PlayerEvent::FileLoaded,
        Some("end-file") => PlayerEvent::EndFile {
            reason: raw.reason.unwrap_or_default(),
            file_error: raw.file_error,
        },
        Some(other) => PlayerEvent::Other(other.to_string()),
        None => match raw.error {
            Some(error) => PlayerEvent::Reply {
                request_id: raw.request_id,
                error,
                data: raw.data,
            },
            None => PlayerEvent::Unrecognized(line.to_string()),
        },
    }
}

async fn read_events<R>(reader: R, tx: mpsc::Sender<PlayerEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ipc reader cancelled");
                break;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                trace!(line = %line, "ipc message");
                if tx.send(parse_message(&line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("ipc stream closed by player");
                break;
            }
            Err(e) => {
                warn!(error = %e, "ipc read failed");
                break;
            }
        }
    }
}

/// Connected IPC session with the player
pub struct IpcClient {
    writer: WriteHalf<Box<dyn IpcStream>>,
    events: mpsc::Receiver<PlayerEvent>,
    cancel: CancellationToken,
    next_request_id: u64,
}

impl IpcClient {
    /// Take over a connected stream. Cancelling `cancel` stops the reader.
    pub fn new(stream: Box<dyn IpcStream>, cancel: CancellationToken) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_events(reader, tx, cancel.clone()));

        Self {
            writer,
            events,
            cancel,
            next_request_id: 1,
        }
    }

    /// Send a raw command, returning its request id
    pub async fn send_command(&mut self, args: &[Value]) -> Result<u64, IpcError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut payload = serde_json::to_vec(&Command {
            command: args,
            request_id,
        })?;
        payload.push(b'\n');

        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        debug!(request_id, command = ?args, "ipc command sent");
        Ok(request_id)
    }

    pub async fn get_property(&mut self, name: &str) -> Result<u64, IpcError> {
        self.send_command(&[json!("get_property"), json!(name)]).await
    }

    pub async fn observe_property(&mut self, id: u64, name: &str) -> Result<u64, IpcError> {
        self.send_command(&[json!("observe_property"), json!(id), json!(name)])
            .await
    }

    /// Next message from the player, or `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<PlayerEvent> {
        self.events.recv().await
    }

    /// Stop the reader. Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.close();
    }
}
