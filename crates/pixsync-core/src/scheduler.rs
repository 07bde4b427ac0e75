//! Periodic callbacks on the owner thread.
//!
//! Hosts usually already own a timer facility; [`Scheduler`] is the seam
//! pixsync registers its ticks against. [`TickScheduler`] is a plain
//! implementation for hosts (and tests) that drive their own loop.

use crate::error::SchedulerError;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// A periodic callback. Returns the delay until the next run, or `None`
/// to stop repeating.
pub type TimerCallback = Box<dyn FnMut() -> Option<Duration>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owner-thread periodic callback facility.
pub trait Scheduler {
    fn register(&mut self, name: &'static str, first: Duration, callback: TimerCallback)
        -> TimerId;

    fn unregister(&mut self, id: TimerId) -> Result<(), SchedulerError>;

    fn is_registered(&self, id: TimerId) -> bool;
}

struct Timer {
    id: TimerId,
    name: &'static str,
    due: Instant,
    callback: TimerCallback,
}

/// Single-threaded timer list driven by [`TickScheduler::run_due`].
#[derive(Default)]
pub struct TickScheduler {
    timers: Vec<Timer>,
    next_id: u64,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest deadline among registered timers.
    pub fn next_due(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.due).min()
    }

    /// Runs every timer whose deadline is at or before `now`.
    ///
    /// Returns how many callbacks ran. Callbacks returning `None` are
    /// dropped.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        let mut i = 0;

        while i < self.timers.len() {
            if self.timers[i].due > now {
                i += 1;
                continue;
            }

            ran += 1;
            let timer = &mut self.timers[i];
            match (timer.callback)() {
                Some(interval) => {
                    timer.due = now + interval;
                    i += 1;
                }
                None => {
                    debug!("Timer {} ({}) finished", timer.id, timer.name);
                    self.timers.remove(i);
                }
            }
        }

        ran
    }

    /// Blocks the calling thread, running timers as they come due, until
    /// `duration` has passed.
    pub fn run_for(&mut self, duration: Duration) {
        let end = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            self.run_due(now);

            let wake = self.next_due().unwrap_or(end).min(end);
            std::thread::sleep(wake.saturating_duration_since(Instant::now()));
        }
    }
}

impl Scheduler for TickScheduler {
    fn register(
        &mut self,
        name: &'static str,
        first: Duration,
        callback: TimerCallback,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer {
            id,
            name,
            due: Instant::now() + first,
            callback,
        });
        debug!("Registered timer {} ({})", id, name);
        id
    }

    fn unregister(&mut self, id: TimerId) -> Result<(), SchedulerError> {
        let pos = self
            .timers
            .iter()
            .position(|t| t.id == id)
            .ok_or(SchedulerError::NotRegistered(id))?;
        let timer = self.timers.remove(pos);
        debug!("Unregistered timer {} ({})", id, timer.name);
        Ok(())
    }

    fn is_registered(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }
}
