//! Wire types shared by the daemon and its clients.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// The kind of session the timer is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    #[default]
    Focus,
    ShortBreak,
    LongBreak,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [Self::Focus, Self::ShortBreak, Self::LongBreak];

    /// Human-readable name, as shown in the popup.
    pub fn label(self) -> &'static str {
        match self {
            Self::Focus => "Pomodoro",
            Self::ShortBreak => "Short Break",
            Self::LongBreak => "Long Break",
        }
    }

    /// Only focus sessions block sites.
    pub fn blocks_sites(self) -> bool {
        self == Self::Focus
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown session kind '{0}' (expected focus, short-break or long-break)")]
pub struct ParseKindError(String);

impl FromStr for SessionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "focus" | "pomodoro" => Ok(Self::Focus),
            "short-break" | "short" => Ok(Self::ShortBreak),
            "long-break" | "long" => Ok(Self::LongBreak),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Timer state as it crosses the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub min: u32,
    pub sec: u32,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(default)]
    pub kind: SessionKind,
}

/// Requests a foreground context can send to the background.
///
/// One variant per message type; the JSON tag is `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    UpdateBadge {
        min: u32,
        sec: u32,
        #[serde(rename = "isRunning")]
        is_running: bool,
        #[serde(default)]
        kind: SessionKind,
    },
    ClearBadge,
    SyncState,
    ShowNotification {
        title: String,
        message: String,
    },
    UpdateBlockedUrls {
        #[serde(default)]
        urls: Vec<String>,
    },
    AllowSiteTemporarily {
        url: String,
    },
    CheckShouldBlock {
        #[serde(default)]
        url: Option<String>,
    },
}

impl Message {
    /// Wire name of the message, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateBadge { .. } => "UPDATE_BADGE",
            Self::ClearBadge => "CLEAR_BADGE",
            Self::SyncState => "SYNC_STATE",
            Self::ShowNotification { .. } => "SHOW_NOTIFICATION",
            Self::UpdateBlockedUrls { .. } => "UPDATE_BLOCKED_URLS",
            Self::AllowSiteTemporarily { .. } => "ALLOW_SITE_TEMPORARILY",
            Self::CheckShouldBlock { .. } => "CHECK_SHOULD_BLOCK",
        }
    }
}

impl From<TimerSnapshot> for Message {
    fn from(snapshot: TimerSnapshot) -> Self {
        Self::UpdateBadge {
            min: snapshot.min,
            sec: snapshot.sec,
            is_running: snapshot.is_running,
            kind: snapshot.kind,
        }
    }
}

/// Replies from the background. Variants are told apart by their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Snapshot(TimerSnapshot),
    ShouldBlock {
        #[serde(rename = "shouldBlock")]
        should_block: bool,
    },
    Ack {
        success: bool,
    },
    Error {
        error: String,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Self::Ack { success: true }
    }
}

/// The tab a message was sent from, when it came from an injected page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderTab {
    pub tab_id: u32,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Frames a client writes to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Inbound {
    Request {
        id: u64,
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<SenderTab>,
    },
    /// Ask for badge and inject frames on this connection (browser host role).
    Subscribe,
    TabUpdated {
        tab_id: u32,
        status: TabStatus,
        url: String,
    },
}

/// Frames the daemon writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Outbound {
    Reply {
        id: u64,
        reply: Reply,
    },
    Badge {
        text: String,
        #[serde(default)]
        color: Option<String>,
    },
    Inject {
        tab_id: u32,
        url: String,
    },
}

/// Serialize a frame as a single JSON line.
pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_use_extension_wire_names() {
        let msg = Message::UpdateBadge {
            min: 10,
            sec: 0,
            is_running: true,
            kind: SessionKind::Focus,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "UPDATE_BADGE", "min": 10, "sec": 0, "isRunning": true, "kind": "FOCUS"})
        );
        assert_eq!(
            serde_json::to_value(Message::ClearBadge).unwrap(),
            json!({"type": "CLEAR_BADGE"})
        );
    }

    #[test]
    fn optional_payload_fields_fall_back() {
        let msg: Message =
            serde_json::from_value(json!({"type": "UPDATE_BADGE", "min": 5, "sec": 3, "isRunning": false}))
                .unwrap();
        assert_eq!(
            msg,
            Message::UpdateBadge {
                min: 5,
                sec: 3,
                is_running: false,
                kind: SessionKind::Focus
            }
        );

        let msg: Message = serde_json::from_value(json!({"type": "UPDATE_BLOCKED_URLS"})).unwrap();
        assert_eq!(msg, Message::UpdateBlockedUrls { urls: vec![] });

        let msg: Message = serde_json::from_value(json!({"type": "CHECK_SHOULD_BLOCK"})).unwrap();
        assert_eq!(msg, Message::CheckShouldBlock { url: None });
    }

    #[test]
    fn replies_are_distinguished_by_shape() {
        let snapshot: Reply = serde_json::from_value(
            json!({"min": 24, "sec": 59, "isRunning": true, "kind": "SHORT_BREAK"}),
        )
        .unwrap();
        assert_eq!(
            snapshot,
            Reply::Snapshot(TimerSnapshot {
                min: 24,
                sec: 59,
                is_running: true,
                kind: SessionKind::ShortBreak
            })
        );

        let block: Reply = serde_json::from_value(json!({"shouldBlock": true})).unwrap();
        assert_eq!(block, Reply::ShouldBlock { should_block: true });

        let ack: Reply = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(ack, Reply::ok());
    }

    #[test]
    fn frames_are_single_lines() {
        let frame = Inbound::Request {
            id: 7,
            message: Message::ShowNotification {
                title: "Done".into(),
                message: "line one\nline two".into(),
            },
            sender: None,
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(*bytes.last().unwrap(), b'\n');

        let line = String::from_utf8(bytes).unwrap();
        let back: Inbound = decode_frame(&line).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn session_kind_parses_cli_spellings() {
        assert_eq!("focus".parse::<SessionKind>().unwrap(), SessionKind::Focus);
        assert_eq!("short_break".parse::<SessionKind>().unwrap(), SessionKind::ShortBreak);
        assert_eq!("Long Break".parse::<SessionKind>().unwrap(), SessionKind::LongBreak);
        let err = "nap".parse::<SessionKind>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown session kind 'nap' (expected focus, short-break or long-break)"
        );
    }
}
