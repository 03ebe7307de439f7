//! Inter-process communication between the focuson daemon and its clients
//!
//! The daemon plays the extension's background context; `focusonctl` plays
//! the popup and the injected page script. They talk newline-delimited JSON
//! over a Unix domain socket.

mod client;
mod diagnostics;
mod protocol;

pub use client::{Client, Messenger};
pub use diagnostics::{Diagnostics, Failure};
pub use protocol::{
    decode_frame, encode_frame, Inbound, Message, Outbound, ParseKindError, Reply, SenderTab,
    SessionKind, TabStatus, TimerSnapshot,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is focuson running?")]
    ConnectionRefused,

    #[error("Connection closed before a reply arrived")]
    Closed,

    #[error("Daemon rejected the frame: {0}")]
    Rejected(String),

    #[error("No reply within the timeout")]
    Timeout,
}

pub const SOCKET_PATH: &str = "/tmp/focuson.sock";

/// Frames larger than this are rejected by the daemon.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
