//! Popup-side mirror of the background timer.
//!
//! The daemon owns the countdown. This side keeps a cached copy in its own
//! store so it can show something when the daemon does not answer, and
//! adopts the daemon's snapshot whenever one arrives.

use std::sync::Arc;

use focuson::config::Durations;
use focuson::matcher::BlockList;
use focuson::store::{self, KeyValueStore, StoreError, BLOCKED_URLS};
use focuson::timer::{Remaining, TimerError, TimerSession};
use focuson_ipc::{Diagnostics, Failure, Message, Messenger, Reply, SessionKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CURR_TIME: &str = "currTime";
const IS_TIMER_ON: &str = "isTimerOn";
const CURR_ACTION: &str = "currAction";

#[derive(Debug, Serialize, Deserialize)]
struct CurrTime {
    min: u32,
    sec: u32,
}

pub struct SyncClient<M> {
    messenger: M,
    mirror: Arc<dyn KeyValueStore>,
    shared: Arc<dyn KeyValueStore>,
    durations: Durations,
    diagnostics: Arc<Diagnostics>,
    session: TimerSession,
}

impl<M: Messenger> SyncClient<M> {
    /// Starts from whatever the mirror store holds.
    pub fn new(
        messenger: M,
        mirror: Arc<dyn KeyValueStore>,
        shared: Arc<dyn KeyValueStore>,
        durations: Durations,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let mut client = Self {
            messenger,
            mirror,
            shared,
            durations,
            diagnostics,
            session: TimerSession {
                remaining: durations.remaining(SessionKind::Focus),
                is_running: false,
                kind: SessionKind::Focus,
            },
        };
        match client.read_cache() {
            Ok(session) => client.session = session,
            Err(e) => client
                .diagnostics
                .record(Failure::Store, format_args!("popup cache unreadable: {e}")),
        }
        client
    }

    pub fn session(&self) -> TimerSession {
        self.session
    }

    fn read_cache(&self) -> Result<TimerSession, StoreError> {
        let kind: SessionKind = store::read(self.mirror.as_ref(), CURR_ACTION)?.unwrap_or_default();
        let remaining = match store::read::<CurrTime>(self.mirror.as_ref(), CURR_TIME)? {
            Some(time) => Remaining::new(time.min, time.sec),
            None => self.durations.remaining(kind),
        };
        let is_running = store::read(self.mirror.as_ref(), IS_TIMER_ON)?.unwrap_or(false);
        Ok(TimerSession {
            remaining,
            is_running,
            kind,
        })
    }

    fn persist(&self) {
        let time = CurrTime {
            min: self.session.remaining.minutes(),
            sec: u32::from(self.session.remaining.seconds()),
        };
        let result = store::write(self.mirror.as_ref(), CURR_TIME, &time)
            .and_then(|_| store::write(self.mirror.as_ref(), IS_TIMER_ON, &self.session.is_running))
            .and_then(|_| store::write(self.mirror.as_ref(), CURR_ACTION, &self.session.kind));
        if let Err(e) = result {
            self.diagnostics
                .record(Failure::Store, format_args!("popup cache not saved: {e}"));
        }
    }

    /// Ask the background for its state. Without an answer the cached
    /// session stays as it is.
    pub async fn mount(&mut self) -> TimerSession {
        match self.messenger.send(Message::SyncState).await {
            Some(Reply::Snapshot(snapshot)) => {
                self.session = TimerSession {
                    remaining: Remaining::new(snapshot.min, snapshot.sec),
                    is_running: snapshot.is_running,
                    kind: snapshot.kind,
                };
                self.persist();
            }
            Some(other) => debug!(?other, "unexpected reply to SYNC_STATE"),
            None => debug!("background silent, showing cached session"),
        }
        self.session
    }

    /// Returns false when the mirror already shows a running session.
    pub async fn start(&mut self) -> bool {
        if self.session.is_running {
            return false;
        }
        if self.session.remaining.is_zero() {
            self.session.remaining = self.durations.remaining(self.session.kind);
        }
        self.session.is_running = true;
        self.persist();
        self.messenger
            .send(Message::from(self.session.snapshot()))
            .await;
        true
    }

    pub async fn stop(&mut self) -> bool {
        if !self.session.is_running {
            return false;
        }
        self.messenger.send(Message::ClearBadge).await;
        self.session.is_running = false;
        self.persist();
        self.mount().await;
        true
    }

    pub async fn switch_kind(&mut self, kind: SessionKind) -> Result<(), TimerError> {
        if self.session.is_running {
            return Err(TimerError::SwitchWhileRunning {
                current: self.session.kind,
                requested: kind,
            });
        }
        self.session.kind = kind;
        self.session.remaining = self.durations.remaining(kind);
        self.persist();
        self.messenger
            .send(Message::from(self.session.snapshot()))
            .await;
        Ok(())
    }

    pub fn blocked_sites(&self) -> Result<BlockList, StoreError> {
        let entries: Vec<String> =
            store::read(self.shared.as_ref(), BLOCKED_URLS)?.unwrap_or_default();
        Ok(BlockList::from_entries(entries))
    }

    /// Returns false for empty or already listed entries.
    pub async fn block_site(&mut self, entry: &str) -> Result<bool, StoreError> {
        let mut list = self.blocked_sites()?;
        if !list.insert(entry) {
            return Ok(false);
        }
        self.publish(&list).await?;
        Ok(true)
    }

    pub async fn unblock_site(&mut self, entry: &str) -> Result<bool, StoreError> {
        let mut list = self.blocked_sites()?;
        if !list.remove(entry) {
            return Ok(false);
        }
        self.publish(&list).await?;
        Ok(true)
    }

    /// Replace `old` with `new`. If `new` is already listed the two merge.
    pub async fn edit_site(&mut self, old: &str, new: &str) -> Result<bool, StoreError> {
        let mut list = self.blocked_sites()?;
        if !list.remove(old) {
            return Ok(false);
        }
        list.insert(new);
        self.publish(&list).await?;
        Ok(true)
    }

    async fn publish(&mut self, list: &BlockList) -> Result<(), StoreError> {
        let urls = list.entries().to_vec();
        store::write(self.shared.as_ref(), BLOCKED_URLS, &urls)?;
        self.messenger
            .send(Message::UpdateBlockedUrls { urls })
            .await;
        Ok(())
    }

    /// Whether the background acknowledged the request.
    pub async fn notify(&mut self, title: &str, message: &str) -> bool {
        let reply = self
            .messenger
            .send(Message::ShowNotification {
                title: title.to_string(),
                message: message.to_string(),
            })
            .await;
        matches!(reply, Some(Reply::Ack { success: true }))
    }

    /// Ask the background whether `url` would be intercepted right now.
    pub async fn check(&mut self, url: &str) -> Option<bool> {
        match self
            .messenger
            .send(Message::CheckShouldBlock {
                url: Some(url.to_string()),
            })
            .await?
        {
            Reply::ShouldBlock { should_block } => Some(should_block),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use focuson::store::MemoryStore;
    use focuson_ipc::TimerSnapshot;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers like a background that holds `snapshot`, or not at all when
    /// offline.
    #[derive(Clone, Default)]
    pub(crate) struct FakeMessenger {
        pub sent: Arc<Mutex<Vec<Message>>>,
        pub snapshot: Arc<Mutex<Option<TimerSnapshot>>>,
        pub offline: bool,
        pub should_block: bool,
    }

    impl Messenger for FakeMessenger {
        async fn send(&mut self, message: Message) -> Option<Reply> {
            self.sent.lock().unwrap().push(message.clone());
            if self.offline {
                return None;
            }
            match message {
                Message::SyncState => (*self.snapshot.lock().unwrap()).map(Reply::Snapshot),
                Message::CheckShouldBlock { .. } => Some(Reply::ShouldBlock {
                    should_block: self.should_block,
                }),
                _ => Some(Reply::ok()),
            }
        }
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }
    }

    struct Setup {
        client: SyncClient<FakeMessenger>,
        messenger: FakeMessenger,
        mirror: Arc<MemoryStore>,
        shared: Arc<MemoryStore>,
    }

    fn setup(messenger: FakeMessenger) -> Setup {
        let mirror = Arc::new(MemoryStore::new());
        let shared = Arc::new(MemoryStore::new());
        setup_with(messenger, mirror, shared)
    }

    fn setup_with(
        messenger: FakeMessenger,
        mirror: Arc<MemoryStore>,
        shared: Arc<MemoryStore>,
    ) -> Setup {
        let client = SyncClient::new(
            messenger.clone(),
            mirror.clone(),
            shared.clone(),
            Durations::default(),
            Arc::new(Diagnostics::new()),
        );
        Setup {
            client,
            messenger,
            mirror,
            shared,
        }
    }

    #[tokio::test]
    async fn mount_adopts_background_snapshot() {
        let messenger = FakeMessenger::default();
        *messenger.snapshot.lock().unwrap() = Some(TimerSnapshot {
            min: 12,
            sec: 30,
            is_running: true,
            kind: SessionKind::Focus,
        });
        let mut s = setup(messenger);

        let session = s.client.mount().await;
        assert_eq!(session.remaining, Remaining::new(12, 30));
        assert!(session.is_running);
        assert_eq!(s.mirror.get(CURR_TIME).unwrap(), Some(json!({"min": 12, "sec": 30})));
        assert_eq!(s.mirror.get(IS_TIMER_ON).unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn mount_keeps_cache_when_background_is_silent() {
        let mirror = Arc::new(MemoryStore::new());
        mirror.set(CURR_TIME, json!({"min": 3, "sec": 7})).unwrap();
        mirror.set(CURR_ACTION, json!("SHORT_BREAK")).unwrap();
        let messenger = FakeMessenger {
            offline: true,
            ..Default::default()
        };
        let mut s = setup_with(messenger, mirror, Arc::new(MemoryStore::new()));

        let session = s.client.mount().await;
        assert_eq!(session.remaining, Remaining::new(3, 7));
        assert_eq!(session.kind, SessionKind::ShortBreak);
        assert!(!session.is_running);
    }

    #[tokio::test]
    async fn start_sends_running_update() {
        let mut s = setup(FakeMessenger::default());
        assert!(s.client.start().await);
        assert!(!s.client.start().await);

        assert_eq!(
            s.messenger.sent(),
            vec![Message::UpdateBadge {
                min: 25,
                sec: 0,
                is_running: true,
                kind: SessionKind::Focus,
            }]
        );
    }

    #[tokio::test]
    async fn start_at_zero_reloads_duration() {
        let mirror = Arc::new(MemoryStore::new());
        mirror.set(CURR_TIME, json!({"min": 0, "sec": 0})).unwrap();
        mirror.set(CURR_ACTION, json!("LONG_BREAK")).unwrap();
        let mut s = setup_with(FakeMessenger::default(), mirror, Arc::new(MemoryStore::new()));

        s.client.start().await;
        assert_eq!(s.client.session().remaining, Remaining::new(15, 0));
    }

    #[tokio::test]
    async fn stop_clears_badge_then_resyncs() {
        let mut s = setup(FakeMessenger::default());
        s.client.start().await;
        *s.messenger.snapshot.lock().unwrap() = Some(TimerSnapshot {
            min: 24,
            sec: 10,
            is_running: false,
            kind: SessionKind::Focus,
        });

        assert!(s.client.stop().await);
        let sent = s.messenger.sent();
        assert_eq!(sent[1], Message::ClearBadge);
        assert_eq!(sent[2], Message::SyncState);
        assert_eq!(s.client.session().remaining, Remaining::new(24, 10));
        assert!(!s.client.session().is_running);
    }

    #[tokio::test]
    async fn switch_is_rejected_while_running() {
        let mut s = setup(FakeMessenger::default());
        s.client.start().await;
        assert!(s.client.switch_kind(SessionKind::ShortBreak).await.is_err());
        assert_eq!(s.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn switch_resets_and_tells_background() {
        let mut s = setup(FakeMessenger::default());
        s.client.switch_kind(SessionKind::ShortBreak).await.unwrap();
        assert_eq!(s.client.session().remaining, Remaining::new(5, 0));
        assert_eq!(
            s.messenger.sent(),
            vec![Message::UpdateBadge {
                min: 5,
                sec: 0,
                is_running: false,
                kind: SessionKind::ShortBreak,
            }]
        );
    }

    #[tokio::test]
    async fn blocking_normalizes_dedupes_and_pushes() {
        let mut s = setup(FakeMessenger::default());
        assert!(s.client.block_site("https://www.Reddit.com/r/rust").await.unwrap());
        assert!(!s.client.block_site("reddit.com").await.unwrap());
        assert!(s.client.block_site("news.ycombinator.com").await.unwrap());

        assert_eq!(
            s.shared.get(BLOCKED_URLS).unwrap(),
            Some(json!(["reddit.com", "news.ycombinator.com"]))
        );
        assert_eq!(
            s.messenger.sent().last(),
            Some(&Message::UpdateBlockedUrls {
                urls: vec!["reddit.com".into(), "news.ycombinator.com".into()]
            })
        );
    }

    #[tokio::test]
    async fn edit_and_unblock() {
        let mut s = setup(FakeMessenger::default());
        s.client.block_site("reddit.com").await.unwrap();
        s.client.block_site("youtube.com").await.unwrap();

        assert!(s.client.edit_site("reddit.com", "lobste.rs").await.unwrap());
        assert!(!s.client.edit_site("missing.com", "x.com").await.unwrap());
        assert!(s.client.unblock_site("www.youtube.com").await.unwrap());

        let list = s.client.blocked_sites().unwrap();
        assert_eq!(list.entries(), ["lobste.rs".to_string()]);
    }

    #[tokio::test]
    async fn block_list_edits_survive_a_silent_background() {
        let messenger = FakeMessenger {
            offline: true,
            ..Default::default()
        };
        let mut s = setup(messenger);
        assert!(s.client.block_site("example.com").await.unwrap());
        assert_eq!(s.shared.get(BLOCKED_URLS).unwrap(), Some(json!(["example.com"])));
    }

    #[tokio::test]
    async fn notify_and_check_report_replies() {
        let mut s = setup(FakeMessenger {
            should_block: true,
            ..Default::default()
        });
        assert!(s.client.notify("Hi", "there").await);
        assert_eq!(s.client.check("https://example.com").await, Some(true));

        let mut silent = setup(FakeMessenger {
            offline: true,
            ..Default::default()
        });
        assert!(!silent.client.notify("Hi", "there").await);
        assert_eq!(silent.client.check("https://example.com").await, None);
    }
}
