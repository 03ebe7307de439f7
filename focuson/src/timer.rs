//! The authoritative countdown.
//!
//! The machine never touches a clock. Periodic ticks come from a
//! [`TickScheduler`] it arms and cancels; whoever owns the machine feeds the
//! resulting tick events back through [`TimerMachine::tick`].
//!
//! ```text
//! Idle --start--> Running --stop--> Idle
//!                 Running --tick at 0:00--> Completed --> Idle (0:00)
//! ```

use std::fmt;

use focuson_ipc::{SessionKind, TimerSnapshot};
use thiserror::Error;

use crate::config::Durations;

/// Arms and cancels the one-second tick.
pub trait TickScheduler: Send {
    /// Arm a repeating tick, replacing any previous one. Returns the
    /// generation tag carried by the ticks it will produce.
    fn arm(&mut self) -> u64;
    fn cancel(&mut self);
}

/// Minutes and seconds left. Seconds are always below 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Remaining {
    minutes: u32,
    seconds: u8,
}

impl Remaining {
    pub const ZERO: Remaining = Remaining {
        minutes: 0,
        seconds: 0,
    };

    /// Seconds past 59 carry into minutes.
    pub fn new(minutes: u32, seconds: u32) -> Self {
        Self {
            minutes: minutes.saturating_add(seconds / 60),
            seconds: (seconds % 60) as u8,
        }
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn seconds(self) -> u8 {
        self.seconds
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// One second less, or `None` at 0:00.
    fn decrement(self) -> Option<Self> {
        if self.seconds > 0 {
            Some(Self {
                seconds: self.seconds - 1,
                ..self
            })
        } else if self.minutes > 0 {
            Some(Self {
                minutes: self.minutes - 1,
                seconds: 59,
            })
        } else {
            None
        }
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSession {
    pub remaining: Remaining,
    pub is_running: bool,
    pub kind: SessionKind,
}

impl TimerSession {
    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            min: self.remaining.minutes(),
            sec: u32::from(self.remaining.seconds()),
            is_running: self.is_running,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running, or a tick from a cancelled schedule.
    Ignored,
    Ticked(Remaining),
    /// The countdown hit 0:00. The machine is already back to idle.
    Completed(SessionKind),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("cannot switch to {requested} while a {current} session is running")]
    SwitchWhileRunning {
        current: SessionKind,
        requested: SessionKind,
    },
}

pub struct TimerMachine {
    session: TimerSession,
    durations: Durations,
    scheduler: Box<dyn TickScheduler>,
    generation: Option<u64>,
}

impl TimerMachine {
    /// Starts idle on a full focus session.
    pub fn new(durations: Durations, scheduler: Box<dyn TickScheduler>) -> Self {
        Self {
            session: TimerSession {
                remaining: durations.remaining(SessionKind::Focus),
                is_running: false,
                kind: SessionKind::Focus,
            },
            durations,
            scheduler,
            generation: None,
        }
    }

    pub fn session(&self) -> TimerSession {
        self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running
    }

    pub fn kind(&self) -> SessionKind {
        self.session.kind
    }

    /// Returns false when already running.
    pub fn start(&mut self) -> bool {
        if self.session.is_running {
            return false;
        }
        if self.session.remaining.is_zero() {
            self.session.remaining = self.durations.remaining(self.session.kind);
        }
        self.scheduler.cancel();
        self.generation = Some(self.scheduler.arm());
        self.session.is_running = true;
        true
    }

    /// Pauses; the remaining time is kept. Returns false when already idle.
    pub fn stop(&mut self) -> bool {
        if !self.session.is_running {
            return false;
        }
        self.disarm();
        self.session.is_running = false;
        true
    }

    pub fn switch_kind(&mut self, kind: SessionKind) -> Result<(), TimerError> {
        if self.session.is_running {
            return Err(TimerError::SwitchWhileRunning {
                current: self.session.kind,
                requested: kind,
            });
        }
        self.session.kind = kind;
        self.session.remaining = self.durations.remaining(kind);
        Ok(())
    }

    pub fn set_remaining(&mut self, remaining: Remaining) {
        self.session.remaining = remaining;
    }

    /// Whether a tick tagged with `generation` belongs to the armed schedule.
    pub fn accepts(&self, generation: u64) -> bool {
        self.generation == Some(generation)
    }

    /// Count down one second. The tick that reaches 0:00 completes the
    /// session, so 0:01 completes on the next tick and a 25:00 session
    /// completes on its 1500th. A tick arriving at 0:00 completes as well.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.session.is_running {
            return TickOutcome::Ignored;
        }
        match self.session.remaining.decrement() {
            Some(next) if !next.is_zero() => {
                self.session.remaining = next;
                TickOutcome::Ticked(next)
            }
            _ => {
                self.session.remaining = Remaining::ZERO;
                self.session.is_running = false;
                self.disarm();
                TickOutcome::Completed(self.session.kind)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn armed_generation(&self) -> Option<u64> {
        self.generation
    }

    /// Tick only if `generation` is current.
    pub fn tick_generation(&mut self, generation: u64) -> TickOutcome {
        if !self.accepts(generation) {
            return TickOutcome::Ignored;
        }
        self.tick()
    }

    fn disarm(&mut self) {
        self.scheduler.cancel();
        self.generation = None;
    }
}
