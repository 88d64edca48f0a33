//! named timers with pause/resume, driven by an external clock

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use log::trace;
use thiserror::Error;

/// Anything usable as a timer name.
pub trait TimerKind: Copy + Eq + Hash + Debug {}

impl<T: Copy + Eq + Hash + Debug> TimerKind for T {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("Asked to start timer {0} which is already running")]
    AlreadyRunning(String),

    #[error("Timer {0} is not running")]
    NotRunning(String),

    #[error("Attempted to resume timer {0} which is not currently paused")]
    NotPaused(String),
}

/// Timer operations the protocol state machines are written against.
pub trait TimerService<K: TimerKind> {
    /// Arms `kind` to fire `after` from now. Starting a running timer is an error.
    fn start_timer(&mut self, kind: K, after: Duration) -> Result<(), TimerError>;

    /// Stops `kind` if it is running or paused; a no-op otherwise.
    fn stop_timer(&mut self, kind: K);

    fn is_timer_running(&self, kind: K) -> bool;

    fn timer_remaining(&self, kind: K) -> Result<Duration, TimerError>;

    fn pause_timer(&mut self, kind: K) -> Result<(), TimerError>;

    fn resume_timer(&mut self, kind: K) -> Result<(), TimerError>;

    fn is_timer_paused(&self, kind: K) -> bool;

    /// Drops every running and paused timer.
    fn cancel_all_timers(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Stopped,
    Running { deadline: Duration },
    Paused { remaining: Duration },
}

/// A single timer slot. Every start gets a fresh generation so expiry events
/// scheduled for an earlier start can be recognised as stale.
#[derive(Debug, Clone)]
pub struct PausableTimer {
    state: TimerState,
    generation: u64,
}

impl Default for PausableTimer {
    fn default() -> Self {
        Self {
            state: TimerState::Stopped,
            generation: 0,
        }
    }
}

impl PausableTimer {
    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, TimerState::Paused { .. })
    }

    pub fn deadline(&self) -> Option<Duration> {
        match self.state {
            TimerState::Running { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the deadline, or `None` when already running.
    /// A paused remainder is discarded by a fresh start.
    fn start(&mut self, now: Duration, after: Duration, generation: u64) -> Option<Duration> {
        if self.is_running() {
            return None;
        }
        let deadline = now + after;
        self.state = TimerState::Running { deadline };
        self.generation = generation;
        Some(deadline)
    }

    fn stop(&mut self) {
        self.state = TimerState::Stopped;
    }

    fn remaining(&self, now: Duration) -> Option<Duration> {
        self.deadline().map(|deadline| deadline.saturating_sub(now))
    }

    fn pause(&mut self, now: Duration) -> Option<Duration> {
        let remaining = self.remaining(now)?;
        self.state = TimerState::Paused { remaining };
        Some(remaining)
    }

    fn resume(&mut self, now: Duration, generation: u64) -> Option<Duration> {
        match self.state {
            TimerState::Paused { remaining } => {
                self.state = TimerState::Stopped;
                self.start(now, remaining, generation)
            }
            _ => None,
        }
    }

    fn expire(&mut self, now: Duration, generation: u64) -> bool {
        match self.state {
            TimerState::Running { deadline } if generation == self.generation && deadline <= now => {
                self.state = TimerState::Stopped;
                true
            }
            _ => false,
        }
    }
}

/// A timer start the driver still has to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer<K> {
    pub kind: K,
    pub generation: u64,
    pub deadline: Duration,
}

/// All timers of one protocol instance plus the clock they are measured against.
///
/// The bank does not schedule anything itself: a driver drains
/// [`TimerBank::take_armed`] into its event queue and hands each event back
/// through [`TimerBank::fire`], which filters out stopped or restarted timers.
#[derive(Debug)]
pub struct TimerBank<K: TimerKind> {
    now: Duration,
    next_generation: u64,
    timers: HashMap<K, PausableTimer>,
    armed: Vec<ArmedTimer<K>>,
}

impl<K: TimerKind> Default for TimerBank<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TimerKind> TimerBank<K> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_generation: 1,
            timers: HashMap::new(),
            armed: Vec::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn advance_to(&mut self, now: Duration) {
        debug_assert!(now >= self.now, "clock moved backwards");
        self.now = self.now.max(now);
    }

    /// Timers armed since the previous call, in start order.
    pub fn take_armed(&mut self) -> Vec<ArmedTimer<K>> {
        std::mem::take(&mut self.armed)
    }

    /// Consumes an expiry event. Returns false for stale events.
    pub fn fire(&mut self, event: &ArmedTimer<K>) -> bool {
        self.advance_to(event.deadline);
        let now = self.now;
        self.timers
            .get_mut(&event.kind)
            .map(|timer| timer.expire(now, event.generation))
            .unwrap_or(false)
    }

    /// Earliest running timer, ties broken by start order.
    pub fn next_deadline(&self) -> Option<(Duration, K)> {
        self.timers
            .iter()
            .filter_map(|(kind, timer)| timer.deadline().map(|d| (d, timer.generation(), *kind)))
            .min_by_key(|(deadline, generation, _)| (*deadline, *generation))
            .map(|(deadline, _, kind)| (deadline, kind))
    }

    /// Moves the clock to the earliest deadline and expires that timer.
    pub fn advance_to_next(&mut self) -> Option<K> {
        let (deadline, kind) = self.next_deadline()?;
        let generation = self.timers.get(&kind).map(PausableTimer::generation)?;
        let fired = self.fire(&ArmedTimer { kind, generation, deadline });
        fired.then_some(kind)
    }

    pub fn running(&self) -> Vec<K> {
        self.timers
            .iter()
            .filter(|(_, timer)| timer.is_running())
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn slot(&mut self, kind: K) -> &mut PausableTimer {
        self.timers.entry(kind).or_default()
    }

    fn take_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn arm(&mut self, kind: K, generation: u64, deadline: Duration) {
        trace!("Timer {:?} armed for {:?}", kind, deadline);
        self.armed.push(ArmedTimer { kind, generation, deadline });
    }
}

impl<K: TimerKind> TimerService<K> for TimerBank<K> {
    fn start_timer(&mut self, kind: K, after: Duration) -> Result<(), TimerError> {
        let now = self.now;
        let generation = self.take_generation();
        let deadline = self
            .slot(kind)
            .start(now, after, generation)
            .ok_or_else(|| TimerError::AlreadyRunning(format!("{:?}", kind)))?;
        self.arm(kind, generation, deadline);
        Ok(())
    }

    fn stop_timer(&mut self, kind: K) {
        if let Some(timer) = self.timers.get_mut(&kind) {
            timer.stop();
        }
    }

    fn is_timer_running(&self, kind: K) -> bool {
        self.timers.get(&kind).is_some_and(PausableTimer::is_running)
    }

    fn timer_remaining(&self, kind: K) -> Result<Duration, TimerError> {
        self.timers
            .get(&kind)
            .and_then(|timer| timer.remaining(self.now))
            .ok_or_else(|| TimerError::NotRunning(format!("{:?}", kind)))
    }

    fn pause_timer(&mut self, kind: K) -> Result<(), TimerError> {
        let now = self.now;
        self.timers
            .get_mut(&kind)
            .and_then(|timer| timer.pause(now))
            .map(|_| ())
            .ok_or_else(|| TimerError::NotRunning(format!("{:?}", kind)))
    }

    fn resume_timer(&mut self, kind: K) -> Result<(), TimerError> {
        let now = self.now;
        let generation = self.take_generation();
        let deadline = self
            .timers
            .get_mut(&kind)
            .and_then(|timer| timer.resume(now, generation))
            .ok_or_else(|| TimerError::NotPaused(format!("{:?}", kind)))?;
        self.arm(kind, generation, deadline);
        Ok(())
    }

    fn is_timer_paused(&self, kind: K) -> bool {
        self.timers.get(&kind).is_some_and(PausableTimer::is_paused)
    }

    fn cancel_all_timers(&mut self) {
        self.timers.clear();
        self.armed.clear();
    }
}
