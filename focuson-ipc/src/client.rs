//! Client side of the socket protocol.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::diagnostics::{Diagnostics, Failure};
use crate::protocol::{decode_frame, encode_frame, Inbound, Message, Outbound, Reply, SenderTab, TabStatus};
use crate::IpcError;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort request channel to the background context.
///
/// `None` means the request went unanswered. Callers treat that as a no-op,
/// never as an error shown to the user.
#[allow(async_fn_in_trait)]
pub trait Messenger {
    async fn send(&mut self, message: Message) -> Option<Reply>;
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Lazily connecting client. A broken connection is dropped and re-dialled
/// on the next request.
pub struct Client {
    path: PathBuf,
    conn: Option<Connection>,
    next_id: u64,
    sender: Option<SenderTab>,
    notices: VecDeque<Outbound>,
    diagnostics: Arc<Diagnostics>,
}

impl Client {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
            next_id: 1,
            sender: None,
            notices: VecDeque::new(),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    /// Attach the tab this client speaks for, as an injected page would.
    pub fn with_sender(mut self, sender: SenderTab) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    async fn connection(&mut self) -> Result<&mut Connection, IpcError> {
        if self.conn.is_none() {
            let stream = UnixStream::connect(&self.path).await.map_err(|e| match e.kind() {
                ErrorKind::ConnectionRefused | ErrorKind::NotFound => IpcError::ConnectionRefused,
                _ => IpcError::Io(e),
            })?;
            let (reader, writer) = stream.into_split();
            self.conn = Some(Connection {
                reader: BufReader::new(reader),
                writer,
            });
        }
        self.conn.as_mut().ok_or(IpcError::Closed)
    }

    async fn write_frame(&mut self, frame: &Inbound) -> Result<(), IpcError> {
        let bytes = encode_frame(frame)?;
        let conn = self.connection().await?;
        let mut result = conn.writer.write_all(&bytes).await;
        if result.is_ok() {
            result = conn.writer.flush().await;
        }
        if let Err(e) = result {
            self.conn = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Outbound, IpcError> {
        let conn = self.connection().await?;
        let mut line = String::new();
        let n = match conn.reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                self.conn = None;
                return Err(e.into());
            }
        };
        if n == 0 {
            self.conn = None;
            return Err(IpcError::Closed);
        }
        Ok(decode_frame(&line)?)
    }

    /// Send one message and wait for its reply. Badge and inject frames that
    /// arrive in between are queued for [`Client::next_notice`].
    pub async fn request(&mut self, message: Message) -> Result<Reply, IpcError> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = Inbound::Request {
            id,
            message,
            sender: self.sender.clone(),
        };
        self.write_frame(&frame).await?;

        match tokio::time::timeout(REPLY_TIMEOUT, self.await_reply(id)).await {
            Ok(reply) => reply,
            Err(_) => {
                // The stream may be mid-frame; start over on the next request.
                self.conn = None;
                Err(IpcError::Timeout)
            }
        }
    }

    async fn await_reply(&mut self, id: u64) -> Result<Reply, IpcError> {
        loop {
            match self.read_frame().await? {
                Outbound::Reply { id: reply_id, reply } if reply_id == id => return Ok(reply),
                // The daemon could not read a frame, so it cannot know its id.
                Outbound::Reply {
                    id: 0,
                    reply: Reply::Error { error },
                } => return Err(IpcError::Rejected(error)),
                // A reply to an earlier, abandoned request.
                Outbound::Reply { .. } => continue,
                notice => self.notices.push_back(notice),
            }
        }
    }

    /// Register this connection for badge and inject frames.
    pub async fn subscribe(&mut self) -> Result<(), IpcError> {
        self.write_frame(&Inbound::Subscribe).await
    }

    /// Report a tab navigation, as the browser would.
    pub async fn tab_updated(
        &mut self,
        tab_id: u32,
        status: TabStatus,
        url: impl Into<String>,
    ) -> Result<(), IpcError> {
        let frame = Inbound::TabUpdated {
            tab_id,
            status,
            url: url.into(),
        };
        self.write_frame(&frame).await
    }

    /// Next badge or inject frame on a subscribed connection.
    pub async fn next_notice(&mut self) -> Result<Outbound, IpcError> {
        if let Some(notice) = self.notices.pop_front() {
            return Ok(notice);
        }
        loop {
            match self.read_frame().await? {
                Outbound::Reply { .. } => continue,
                notice => return Ok(notice),
            }
        }
    }
}

impl Messenger for Client {
    async fn send(&mut self, message: Message) -> Option<Reply> {
        let name = message.name();
        match self.request(message).await {
            Ok(Reply::Error { error }) => {
                self.diagnostics
                    .record(Failure::Messaging, format_args!("{name} rejected: {error}"));
                None
            }
            Ok(reply) => Some(reply),
            Err(e) => {
                self.diagnostics
                    .record(Failure::Messaging, format_args!("{name}: {e}"));
                None
            }
        }
    }
}
