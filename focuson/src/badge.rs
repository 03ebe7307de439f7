//! Toolbar badge: a short text label plus a background color.

use std::fmt;

use focuson_ipc::Outbound;
use tokio::sync::broadcast;
use tracing::trace;

use crate::timer::TimerSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Badge {
    pub text: String,
    /// Only set while a countdown is shown.
    pub color: Option<Rgb>,
}

impl Badge {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `MM:SS` while running with time left, empty otherwise.
    pub fn for_session(session: &TimerSession, accent: Rgb) -> Self {
        if session.is_running && !session.remaining.is_zero() {
            Self {
                text: session.remaining.to_string(),
                color: Some(accent),
            }
        } else {
            Self::empty()
        }
    }
}

pub trait BadgeSurface: Send {
    fn render(&mut self, badge: &Badge);
}

/// Publishes badge changes to subscribed host connections.
pub struct BroadcastBadge {
    outbound: broadcast::Sender<Outbound>,
    last: Option<Badge>,
}

impl BroadcastBadge {
    pub fn new(outbound: broadcast::Sender<Outbound>) -> Self {
        Self {
            outbound,
            last: None,
        }
    }
}

impl BadgeSurface for BroadcastBadge {
    fn render(&mut self, badge: &Badge) {
        if self.last.as_ref() == Some(badge) {
            return;
        }
        trace!(text = %badge.text, "badge");
        // No subscribers just means no host is attached right now.
        let _ = self.outbound.send(Outbound::Badge {
            text: badge.text.clone(),
            color: badge.color.map(|c| c.to_string()),
        });
        self.last = Some(badge.clone());
    }
}
