//! # Probe Result Model
//!
//! The aggregate outcome of probing one target, and the completion progress of
//! a whole run.

use std::time::Duration;

/// Aggregate statistics of one probed target.
///
/// Produced once at the end of a probe session and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeResult {
    pub target: String,
    pub transmitted: u64,
    pub received: u64,
    pub mean_round_trip: Duration,
}

impl ProbeResult {
    pub fn new(
        target: impl Into<String>,
        transmitted: u64,
        received: u64,
        mean_round_trip: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            transmitted,
            received,
            mean_round_trip,
        }
    }

    /// Share of echo requests that went unanswered, `0.0` when nothing was sent.
    pub fn loss_fraction(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        self.transmitted.saturating_sub(self.received) as f64 / self.transmitted as f64
    }
}

/// Completion state of a run: how many of `total` units have finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    /// Completed share in `[0, 1]`. An empty run counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}
