//! Unix domain socket server for IPC

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use focuson_ipc::{decode_frame, encode_frame, Inbound, Outbound, Reply, MAX_FRAME_SIZE};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::coordinator::TabUpdate;
use crate::service::CoordinatorHandle;

const FRAME_QUEUE: usize = 16;

/// Bind the socket, replacing a stale one left by a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    // Remove old socket if it exists
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set socket permissions: {}", path.display()))?;
    }

    info!("IPC server listening on {}", path.display());
    Ok(listener)
}

pub async fn serve(
    listener: UnixListener,
    handle: CoordinatorHandle,
    outbound: broadcast::Sender<Outbound>,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let handle = handle.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handle, outbound).await {
                        debug!("Client connection ended: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn next_notice(notices: &mut Option<broadcast::Receiver<Outbound>>) -> Option<Outbound> {
    let Some(rx) = notices.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(notice) => return Some(notice),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "host connection lagging, notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

enum ReadFrame {
    Line(String),
    /// A frame over `MAX_FRAME_SIZE`, skipped up to its newline.
    TooLarge(usize),
}

/// Read one newline-terminated frame without buffering more than
/// `MAX_FRAME_SIZE` bytes of it. `None` at end of stream.
async fn next_frame<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<Option<ReadFrame>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.ends_with(b"\n") || line.len() <= MAX_FRAME_SIZE {
        return Ok(Some(ReadFrame::Line(String::from_utf8_lossy(line).into_owned())));
    }

    let mut skipped = line.len();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        match buf.iter().position(|b| *b == b'\n') {
            Some(idx) => {
                reader.consume(idx + 1);
                skipped += idx + 1;
                break;
            }
            None => {
                let len = buf.len();
                reader.consume(len);
                skipped += len;
            }
        }
    }
    Ok(Some(ReadFrame::TooLarge(skipped)))
}

/// Runs in its own task so a frame is never cut short by a notice being
/// written on the same connection.
async fn read_frames<R>(mut reader: R, frames: mpsc::Sender<io::Result<ReadFrame>>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let frame = match next_frame(&mut reader, &mut line).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        let failed = frame.is_err();
        if frames.send(frame).await.is_err() || failed {
            break;
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    handle: CoordinatorHandle,
    outbound: broadcast::Sender<Outbound>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (frames_tx, mut frames) = mpsc::channel(FRAME_QUEUE);
    let reader_task = tokio::spawn(read_frames(BufReader::new(reader), frames_tx));
    let mut notices: Option<broadcast::Receiver<Outbound>> = None;

    let result: Result<()> = async {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        break;
                    };
                    if let Some(response) = process_frame(frame?, &handle, &outbound, &mut notices).await {
                        writer.write_all(&encode_frame(&response)?).await?;
                        writer.flush().await?;
                    }
                }
                notice = next_notice(&mut notices) => {
                    match notice {
                        Some(notice) => {
                            writer.write_all(&encode_frame(&notice)?).await?;
                            writer.flush().await?;
                        }
                        None => notices = None,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    reader_task.abort();
    result
}

async fn process_frame(
    frame: ReadFrame,
    handle: &CoordinatorHandle,
    outbound: &broadcast::Sender<Outbound>,
    notices: &mut Option<broadcast::Receiver<Outbound>>,
) -> Option<Outbound> {
    let line = match frame {
        ReadFrame::Line(line) => line,
        ReadFrame::TooLarge(size) => {
            return Some(error_reply(
                0,
                format!("Frame too large: {} bytes (max {})", size, MAX_FRAME_SIZE),
            ));
        }
    };

    let frame = match decode_frame::<Inbound>(&line) {
        Ok(frame) => frame,
        Err(e) => return Some(error_reply(0, format!("Failed to parse request: {}", e))),
    };

    match frame {
        Inbound::Request {
            id,
            message,
            sender,
        } => {
            let reply = handle
                .request(message, sender)
                .await
                .unwrap_or_else(|| Reply::Error {
                    error: "background is shutting down".to_string(),
                });
            Some(Outbound::Reply { id, reply })
        }
        Inbound::Subscribe => {
            if notices.is_none() {
                *notices = Some(outbound.subscribe());
            }
            None
        }
        Inbound::TabUpdated {
            tab_id,
            status,
            url,
        } => {
            handle
                .tab_updated(TabUpdate {
                    tab_id,
                    status,
                    url,
                })
                .await;
            None
        }
    }
}

fn error_reply(id: u64, error: String) -> Outbound {
    Outbound::Reply {
        id,
        reply: Reply::Error { error },
    }
}
