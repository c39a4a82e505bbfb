//! Population progress phase tracking
//!
//! `floor(min_iteration / phase_iteration)`, capped at
//! `floor(stop_iteration / phase_iteration)`, monotonic non-decreasing.

use crate::config::SchedulerConfig;
use crate::trial::TrialState;
use tracing::info;

/// Tracks which phase the population, as a whole, has entered.
#[derive(Debug, Clone)]
pub struct TrialPhase {
    phase_iteration: u64,
    max_phase: u64,
    current_phase: u64,
}

impl TrialPhase {
    pub fn new(stop_iteration: u64, phase_iteration: u64) -> Self {
        assert!(phase_iteration > 0, "phase_iteration must be > 0");
        Self {
            phase_iteration,
            max_phase: stop_iteration / phase_iteration,
            current_phase: 0,
        }
    }

    /// Construct from a `SchedulerConfig`, reusing its `max_phase()` instead
    /// of recomputing `stop_iteration / phase_iteration` here.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            phase_iteration: config.phase_iteration,
            max_phase: config.max_phase(),
            current_phase: 0,
        }
    }

    pub fn current_phase(&self) -> u64 {
        self.current_phase
    }

    /// Recompute `current_phase` from the minimum iteration across `trials`.
    ///
    /// Returns `Some((old, new))` iff the phase strictly advanced. Empty
    /// input leaves `current_phase` untouched (`None`). Once every trial is
    /// at or past `stop_iteration`, `current_phase` is pinned at
    /// `max_phase` because `min_iteration` itself is capped there.
    pub fn update_phase(&mut self, trials: &[TrialState]) -> Option<(u64, u64)> {
        let Some(min_iteration) = trials.iter().map(|t| t.iteration).min() else {
            return None;
        };

        let candidate = (min_iteration / self.phase_iteration).min(self.max_phase);

        if candidate > self.current_phase {
            let old = self.current_phase;
            self.current_phase = candidate;
            info!(from = old, to = candidate, "phase advanced");
            Some((old, candidate))
        } else {
            None
        }
    }
}
