//! Fixed-interval tick bookkeeping
//!
//! The scheduler itself never sleeps. The room runtime owns the timer and
//! reports each fire here, which keeps the Stopped/Running transitions and
//! the skip-overdue-ticks policy testable without a runtime.

use log::{info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// When a room stops ticking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPolicy {
    /// Start on the first join, stop when the last session leaves
    StopWhenEmpty,
    /// Start on the first join, keep ticking until the room is disposed
    RunUntilDisposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Sequence number of this fire, starting at 1
    pub fired: u64,
    /// Intervals that elapsed without a fire since the previous one
    pub skipped: u64,
}

#[derive(Debug)]
pub struct TickScheduler {
    state: SchedulerState,
    interval: Duration,
    policy: TickPolicy,
    last_fire: Option<Instant>,
    ticks_fired: u64,
    ticks_skipped: u64,
}

impl TickScheduler {
    pub fn new(interval: Duration, policy: TickPolicy) -> Self {
        Self {
            state: SchedulerState::Stopped,
            interval,
            policy,
            last_fire: None,
            ticks_fired: 0,
            ticks_skipped: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ticks_fired(&self) -> u64 {
        self.ticks_fired
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped
    }

    /// Returns true if this call moved the scheduler to Running
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        info!("Tick scheduler started ({:?} interval)", self.interval);
        self.state = SchedulerState::Running;
        self.last_fire = None;
        true
    }

    /// Returns true if this call moved the scheduler to Stopped
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        info!(
            "Tick scheduler stopped after {} ticks ({} skipped)",
            self.ticks_fired, self.ticks_skipped
        );
        self.state = SchedulerState::Stopped;
        true
    }

    /// Applies the tick policy after a join or leave
    ///
    /// Returns the new state if it changed.
    pub fn on_occupancy_changed(&mut self, room_empty: bool) -> Option<SchedulerState> {
        let changed = if !room_empty {
            self.start()
        } else if self.policy == TickPolicy::StopWhenEmpty {
            self.stop()
        } else {
            false
        };
        changed.then_some(self.state)
    }

    /// Records a fire that was due at `deadline` and ran at `fired_at`
    ///
    /// Overdue ticks are never replayed: if several intervals passed since
    /// the last fire, one tick runs and the rest are counted as skipped.
    /// Lateness counts too, since the timer will not replay the intervals a
    /// late fire overran. Returns `None` when stopped, since a stopped
    /// scheduler must not tick.
    pub fn record_fire(&mut self, deadline: Instant, fired_at: Instant) -> Option<TickReport> {
        if !self.is_running() {
            return None;
        }

        let interval_nanos = self.interval.as_nanos().max(1);
        let gap = match self.last_fire {
            Some(last) if deadline > last => {
                let intervals = deadline.duration_since(last).as_nanos() / interval_nanos;
                (intervals as u64).saturating_sub(1)
            }
            _ => 0,
        };
        let overrun =
            (fired_at.saturating_duration_since(deadline).as_nanos() / interval_nanos) as u64;
        let skipped = gap + overrun;

        if skipped > 0 {
            warn!(
                "Tick overran its budget, skipping {} overdue tick(s)",
                skipped
            );
        }

        // The overrun intervals are already counted
        let covered = self
            .interval
            .saturating_mul(u32::try_from(overrun).unwrap_or(u32::MAX));
        self.last_fire = Some(deadline.checked_add(covered).unwrap_or(fired_at));
        self.ticks_fired += 1;
        self.ticks_skipped += skipped;

        Some(TickReport {
            fired: self.ticks_fired,
            skipped,
        })
    }
}
