//! Serialized event loop around the coordinator.
//!
//! Requests, ticks, tab updates and store changes all funnel through one
//! channel and are handled one at a time by a single task.

use std::sync::Arc;

use focuson_ipc::{Message, Reply, SenderTab};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::{Coordinator, TabUpdate};
use crate::store::{KeyValueStore, StoreChange};

const EVENT_CAPACITY: usize = 256;

pub enum Event {
    Request {
        message: Message,
        sender: Option<SenderTab>,
        reply: oneshot::Sender<Reply>,
    },
    Tick {
        generation: u64,
    },
    TabUpdated(TabUpdate),
    StoreChanged(StoreChange),
}

pub fn channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_CAPACITY)
}

/// Cheap, cloneable way into the loop.
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<Event>,
}

impl CoordinatorHandle {
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self { events }
    }

    /// `None` if the loop has shut down.
    pub async fn request(&self, message: Message, sender: Option<SenderTab>) -> Option<Reply> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Request {
                message,
                sender,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn tab_updated(&self, update: TabUpdate) -> bool {
        self.events.send(Event::TabUpdated(update)).await.is_ok()
    }
}

/// Drain events until every sender is gone.
pub async fn run(mut coordinator: Coordinator, mut events: mpsc::Receiver<Event>) {
    coordinator.startup();
    while let Some(event) = events.recv().await {
        match event {
            Event::Request {
                message,
                sender,
                reply,
            } => {
                let response = coordinator.handle(message, sender.as_ref());
                // The asker may have gone away; its reply is simply dropped.
                if reply.send(response).is_err() {
                    debug!("requester left before the reply");
                }
            }
            Event::Tick { generation } => coordinator.on_tick(generation),
            Event::TabUpdated(update) => coordinator.on_tab_updated(update),
            Event::StoreChanged(change) => coordinator.on_store_change(change),
        }
    }
    info!("coordinator loop stopped");
}

pub fn spawn(coordinator: Coordinator, events: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(run(coordinator, events))
}

/// Forward the store's change notifications into the loop.
pub fn watch_store(store: &Arc<dyn KeyValueStore>, handle: &CoordinatorHandle) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    let events = handle.events.downgrade();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    let Some(events) = events.upgrade() else {
                        break;
                    };
                    if events.send(Event::StoreChanged(change)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "store watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
