//! Tokio-backed tick source for the timer.

use std::time::Duration;

use tokio::sync::mpsc::{Sender, WeakSender};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::service::Event;
use crate::timer::TickScheduler;

/// Sends `Event::Tick` into the service loop once per period.
///
/// Holds only a weak sender, so an armed interval never keeps the loop alive
/// on its own.
pub struct IntervalScheduler {
    events: WeakSender<Event>,
    period: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl IntervalScheduler {
    pub fn new(events: &Sender<Event>, period: Duration) -> Self {
        Self {
            events: events.downgrade(),
            period,
            generation: 0,
            task: None,
        }
    }
}

impl TickScheduler for IntervalScheduler {
    fn arm(&mut self) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let events = self.events.clone();
        let period = self.period;

        self.task = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(events) = events.upgrade() else {
                    break;
                };
                if events.send(Event::Tick { generation }).await.is_err() {
                    break;
                }
            }
        }));
        generation
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period_with_current_generation() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = IntervalScheduler::new(&tx, Duration::from_secs(1));

        let generation = scheduler.arm();
        for _ in 0..3 {
            match rx.recv().await {
                Some(Event::Tick { generation: got }) => assert_eq!(got, generation),
                _ => panic!("expected a tick"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_previous_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = IntervalScheduler::new(&tx, Duration::from_secs(1));

        let first = scheduler.arm();
        let second = scheduler.arm();
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::Tick { generation } => assert_eq!(generation, second),
                _ => panic!("expected a tick"),
            }
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = IntervalScheduler::new(&tx, Duration::from_secs(1));

        scheduler.arm();
        scheduler.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
