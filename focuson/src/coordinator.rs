//! The background context's single source of truth.
//!
//! Owns the live timer, the temporary allows and the block list mirror.
//! Nothing else mutates them; every change arrives as a [`Message`], a tick,
//! a tab update or a store change, and is handled to completion before the
//! next one (see `service`).

use std::sync::Arc;

use focuson_ipc::{Diagnostics, Failure, Message, Outbound, Reply, SenderTab, SessionKind, TabStatus, TimerSnapshot};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::badge::{Badge, BadgeSurface, Rgb};
use crate::matcher::{self, BlockList, TemporaryAllowSet};
use crate::notify::{self, Notifier};
use crate::store::{self, KeyValueStore, StoreChange, BLOCKED_URLS};
use crate::timer::{Remaining, TickOutcome, TimerMachine, TimerSession};

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("no browser host is attached")]
    NoHost,

    #[error("cannot inject into privileged page {0}")]
    Privileged(String),
}

/// Runs the page interception agent inside a tab.
pub trait Injector: Send {
    fn inject(&mut self, tab_id: u32, url: &str) -> Result<(), InjectError>;
}

const PRIVILEGED_SCHEMES: [&str; 4] = ["chrome:", "chrome-extension:", "about:", "edge:"];

pub fn is_privileged(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    PRIVILEGED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme))
}

/// Asks subscribed host connections to inject the agent.
pub struct BroadcastInjector {
    outbound: broadcast::Sender<Outbound>,
}

impl BroadcastInjector {
    pub fn new(outbound: broadcast::Sender<Outbound>) -> Self {
        Self { outbound }
    }
}

impl Injector for BroadcastInjector {
    fn inject(&mut self, tab_id: u32, url: &str) -> Result<(), InjectError> {
        if is_privileged(url) {
            return Err(InjectError::Privileged(url.to_string()));
        }
        self.outbound
            .send(Outbound::Inject {
                tab_id,
                url: url.to_string(),
            })
            .map(|_| ())
            .map_err(|_| InjectError::NoHost)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabUpdate {
    pub tab_id: u32,
    pub status: TabStatus,
    pub url: String,
}

/// Outward-facing capabilities the coordinator drives.
pub struct Surfaces {
    pub badge: Box<dyn BadgeSurface>,
    pub notifier: Box<dyn Notifier>,
    pub injector: Box<dyn Injector>,
}

pub struct Coordinator {
    timer: TimerMachine,
    blocked: BlockList,
    allowed: TemporaryAllowSet,
    accent: Rgb,
    surfaces: Surfaces,
    store: Arc<dyn KeyValueStore>,
    diagnostics: Arc<Diagnostics>,
}

impl Coordinator {
    pub fn new(
        timer: TimerMachine,
        store: Arc<dyn KeyValueStore>,
        surfaces: Surfaces,
        accent: Rgb,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            timer,
            blocked: BlockList::new(),
            allowed: TemporaryAllowSet::new(),
            accent,
            surfaces,
            store,
            diagnostics,
        }
    }

    /// Load the persisted block list and clear any stale badge.
    pub fn startup(&mut self) {
        match store::read::<Vec<String>>(self.store.as_ref(), BLOCKED_URLS) {
            Ok(urls) => self.blocked = BlockList::from_entries(urls.unwrap_or_default()),
            Err(e) => self.diagnostics.record(Failure::Store, e),
        }
        info!(blocked = self.blocked.len(), "coordinator ready");
        self.surfaces.badge.render(&Badge::empty());
    }

    pub fn session(&self) -> TimerSession {
        self.timer.session()
    }

    pub fn blocked(&self) -> &BlockList {
        &self.blocked
    }

    pub fn allowed(&self) -> &TemporaryAllowSet {
        &self.allowed
    }

    pub fn should_block(&self, url: &str) -> bool {
        matcher::should_block(url, &self.timer.session(), &self.blocked, &self.allowed)
    }

    pub fn handle(&mut self, message: Message, sender: Option<&SenderTab>) -> Reply {
        debug!(message = message.name(), "handling");
        match message {
            // A running update at 0:00 on an idle timer starts a fresh
            // session of the configured length, like pressing start on a
            // spent timer.
            Message::UpdateBadge {
                min,
                sec,
                is_running,
                kind,
            } => {
                self.apply_update(TimerSnapshot {
                    min,
                    sec,
                    is_running,
                    kind,
                });
                Reply::ok()
            }
            Message::ClearBadge => {
                self.timer.stop();
                self.allowed.clear();
                self.surfaces.badge.render(&Badge::empty());
                Reply::ok()
            }
            Message::SyncState => Reply::Snapshot(self.timer.session().snapshot()),
            Message::ShowNotification { title, message } => {
                self.notify(&title, &message);
                Reply::ok()
            }
            Message::UpdateBlockedUrls { urls } => {
                self.blocked = BlockList::from_entries(&urls);
                if let Err(e) = store::write(self.store.as_ref(), BLOCKED_URLS, &self.blocked.entries()) {
                    self.diagnostics.record(Failure::Store, e);
                }
                info!(blocked = self.blocked.len(), "block list updated");
                Reply::ok()
            }
            Message::AllowSiteTemporarily { url } => {
                let session = self.timer.session();
                if session.is_running && session.kind.blocks_sites() {
                    matcher::allow_temporarily(&url, &mut self.allowed);
                    info!(host = %matcher::normalize(&url), "allowed until the focus session ends");
                } else {
                    debug!(%url, "no focus session running, allow ignored");
                }
                Reply::ok()
            }
            Message::CheckShouldBlock { url } => {
                let url = url
                    .or_else(|| sender.map(|tab| tab.url.clone()))
                    .unwrap_or_default();
                Reply::ShouldBlock {
                    should_block: self.should_block(&url),
                }
            }
        }
    }

    fn apply_update(&mut self, snapshot: TimerSnapshot) {
        let remaining = Remaining::new(snapshot.min, snapshot.sec);

        if !snapshot.is_running {
            self.timer.stop();
            self.switch_if_changed(snapshot.kind);
            self.timer.set_remaining(remaining);
            self.allowed.clear();
        } else if self.timer.is_running() {
            if snapshot.kind != self.timer.kind() {
                if let Err(e) = self.timer.switch_kind(snapshot.kind) {
                    warn!("{}", e);
                    self.diagnostics.record(Failure::Rejected, e);
                }
                return;
            }
            self.timer.set_remaining(remaining);
        } else {
            self.switch_if_changed(snapshot.kind);
            self.timer.set_remaining(remaining);
            if self.timer.start() {
                info!(kind = %snapshot.kind, remaining = %remaining, "timer started");
            }
        }
        self.render_badge();
    }

    /// Only called while idle, where switching cannot fail.
    fn switch_if_changed(&mut self, kind: SessionKind) {
        if kind == self.timer.kind() {
            return;
        }
        if let Err(e) = self.timer.switch_kind(kind) {
            self.diagnostics.record(Failure::Rejected, e);
        }
    }

    pub fn on_tick(&mut self, generation: u64) {
        match self.timer.tick_generation(generation) {
            TickOutcome::Ignored => {}
            TickOutcome::Ticked(_) => self.render_badge(),
            TickOutcome::Completed(kind) => self.complete(kind),
        }
    }

    fn complete(&mut self, kind: SessionKind) {
        info!(%kind, "session complete");
        self.surfaces.badge.render(&Badge::empty());
        if kind.blocks_sites() {
            self.allowed.clear();
        }
        let (title, message) = notify::completion_message(kind);
        self.notify(&title, &message);
    }

    pub fn on_tab_updated(&mut self, update: TabUpdate) {
        if update.status != TabStatus::Complete || !self.should_block(&update.url) {
            return;
        }
        match self.surfaces.injector.inject(update.tab_id, &update.url) {
            Ok(()) => info!(tab = update.tab_id, url = %update.url, "blocked page, agent injected"),
            Err(e) => self.diagnostics.record(Failure::Injection, e),
        }
    }

    pub fn on_store_change(&mut self, change: StoreChange) {
        if change.key != BLOCKED_URLS {
            return;
        }
        match serde_json::from_value::<Option<Vec<String>>>(change.value) {
            Ok(urls) => {
                self.blocked = BlockList::from_entries(urls.unwrap_or_default());
                debug!(blocked = self.blocked.len(), "block list mirrored from store");
            }
            Err(e) => self.diagnostics.record(Failure::Store, e),
        }
    }

    fn render_badge(&mut self) {
        let badge = Badge::for_session(&self.timer.session(), self.accent);
        self.surfaces.badge.render(&badge);
    }

    fn notify(&mut self, title: &str, message: &str) {
        if let Err(e) = self.surfaces.notifier.notify(title, message) {
            self.diagnostics.record(Failure::Notification, e);
        }
    }
}
