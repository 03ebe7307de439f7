//! Desktop notifications.

use thiserror::Error;
use tracing::debug;

use crate::config::NotificationPermission;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("desktop notification failed: {0}")]
    Desktop(String),
}

pub trait Notifier: Send {
    /// Without permission this is a silent no-op, not an error.
    fn notify(&mut self, title: &str, message: &str) -> Result<(), NotifyError>;
}

pub struct DesktopNotifier {
    permission: NotificationPermission,
}

impl DesktopNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self { permission }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&mut self, title: &str, message: &str) -> Result<(), NotifyError> {
        if self.permission != NotificationPermission::Granted {
            debug!(title, permission = ?self.permission, "notification suppressed");
            return Ok(());
        }
        notify_rust::Notification::new()
            .summary(title)
            .body(message)
            .appname("focuson")
            .show()
            .map(|_| ())
            .map_err(|e| NotifyError::Desktop(e.to_string()))
    }
}

/// Title and body announcing that a session ran out.
pub fn completion_message(kind: focuson_ipc::SessionKind) -> (String, String) {
    (
        "Timer Complete! ⏰".to_string(),
        format!("{} is complete. Great job staying focused!", kind.label()),
    )
}
