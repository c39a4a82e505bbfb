//! Tuner-side ledger of the latest observed `TrialState` for every trial.
//!
//! Keyed storage over a `DashMap`, in the shape of the teacher's
//! `CommandLog` (`knhk-consensus::state`): append/overwrite by key, plus a
//! handful of read-only query methods.

use crate::trial::{TrialId, TrialState};
use dashmap::DashMap;
use tracing::info;

/// `(accuracy, trial_id)` of the best trial ever observed.
pub type HistoryBest = (f64, TrialId);

/// The Tuner's ledger: `id -> latest TrialState`, plus best-so-far tracking.
#[derive(Debug, Default)]
pub struct TrialResult {
    progress: DashMap<TrialId, TrialState>,
    history_best: parking_lot::Mutex<Option<HistoryBest>>,
}

impl TrialResult {
    pub fn new() -> Self {
        Self {
            progress: DashMap::new(),
            history_best: parking_lot::Mutex::new(None),
        }
    }

    /// Write `ts` into the ledger. Does not touch `history_best`.
    pub fn record_trial_progress(&self, ts: TrialState) {
        self.progress.insert(ts.id, ts);
    }

    /// Write `ts`; if `ts.accuracy` beats the current best, replace it.
    pub fn update_trial_result(&self, ts: TrialState) {
        let mut best = self.history_best.lock();
        let is_new_best = match *best {
            Some((acc, _)) => ts.accuracy > acc,
            None => true,
        };
        if is_new_best {
            *best = Some((ts.accuracy, ts.id));
        }
        drop(best);
        self.progress.insert(ts.id, ts);
    }

    /// Current best `(accuracy, trial_id)`, if any trial has ever been
    /// recorded via `update_trial_result`.
    pub fn history_best(&self) -> Option<HistoryBest> {
        *self.history_best.lock()
    }

    /// Snapshot of all current ledger values. Order is unspecified; callers
    /// must not mutate the ledger through this snapshot (it is a clone).
    pub fn get_trial_progress(&self) -> Vec<TrialState> {
        self.progress.iter().map(|e| e.value().clone()).collect()
    }

    /// Partition the ledger into `(lower, upper)` quantiles by accuracy.
    ///
    /// `k = floor(N * ratio)`. Sorted by `(accuracy, id)` ascending so
    /// boundary ties are resolved deterministically (spec.md leaves ledger
    /// order, and hence tie-breaking, unspecified -- see DESIGN.md). When
    /// `k == 0`, `lower` is empty and `upper` is the entire ledger, so
    /// mutation always finds a donor. Both slices are read off the intact
    /// sorted snapshot rather than split in place, so a `ratio` above 0.5
    /// (`k > n - k`) overlaps the two halves instead of panicking.
    pub fn get_quantile(&self, ratio: f64) -> (Vec<TrialState>, Vec<TrialState>) {
        let mut values = self.get_trial_progress();
        values.sort_by(|a, b| {
            a.accuracy
                .partial_cmp(&b.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let n = values.len();
        let k = ((n as f64) * ratio).floor() as usize;

        if k == 0 {
            (Vec::new(), values)
        } else {
            let lower = values[..k].to_vec();
            let upper = values[n - k..].to_vec();
            (lower, upper)
        }
    }

    /// Observational dump of the ledger. Does not mutate anything.
    pub fn display_trial_progress(&self) {
        let mut rows: Vec<_> = self
            .progress
            .iter()
            .map(|e| {
                let t = e.value();
                (t.id, t.iteration, t.accuracy, t.status)
            })
            .collect();
        rows.sort_by_key(|(id, ..)| *id);

        for (id, iteration, accuracy, status) in rows {
            info!(
                trial = %id,
                iteration,
                accuracy,
                status = ?status,
                "trial progress"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::{Hyperparameter, ModelType, TrialId, TrialState};

    fn trial(id: u64, accuracy: f64) -> TrialState {
        let mut t = TrialState::new(
            TrialId(id),
            Hyperparameter {
                lr: 0.1,
                momentum: 0.9,
                batch_size: 32,
                model_type: ModelType::Resnet18,
            },
            100,
        );
        t.accuracy = accuracy;
        t
    }

    #[test]
    fn record_does_not_touch_history_best() {
        let ledger = TrialResult::new();
        ledger.record_trial_progress(trial(1, 0.9));
        assert_eq!(ledger.history_best(), None);
    }

    #[test]
    fn update_tracks_best_so_far() {
        let ledger = TrialResult::new();
        ledger.update_trial_result(trial(1, 0.5));
        ledger.update_trial_result(trial(2, 0.9));
        ledger.update_trial_result(trial(3, 0.3));
        assert_eq!(ledger.history_best(), Some((0.9, TrialId(2))));
    }

    #[test]
    fn quantile_splits_by_accuracy() {
        let ledger = TrialResult::new();
        for (id, acc) in [(1, 0.1), (2, 0.2), (3, 0.3), (4, 0.4), (5, 0.5), (6, 0.6)] {
            ledger.record_trial_progress(trial(id, acc));
        }
        let (lower, upper) = ledger.get_quantile(0.25);
        assert_eq!(lower.len(), 1);
        assert_eq!(upper.len(), 1);
        assert_eq!(lower[0].id, TrialId(1));
        assert_eq!(upper[0].id, TrialId(6));
    }

    #[test]
    fn quantile_falls_back_to_full_ledger_when_k_is_zero() {
        let ledger = TrialResult::new();
        for (id, acc) in [(1, 0.1), (2, 0.2), (3, 0.3)] {
            ledger.record_trial_progress(trial(id, acc));
        }
        // N=3, ratio=0.25 -> k = floor(0.75) = 0
        let (lower, upper) = ledger.get_quantile(0.25);
        assert!(lower.is_empty());
        assert_eq!(upper.len(), 3);
    }

    #[test]
    fn quantile_above_half_does_not_panic_and_overlaps() {
        let ledger = TrialResult::new();
        for (id, acc) in [(1, 0.1), (2, 0.2), (3, 0.3), (4, 0.4), (5, 0.5)] {
            ledger.record_trial_progress(trial(id, acc));
        }
        // N=5, ratio=0.6 -> k = floor(3.0) = 3, n-k = 2: the two halves
        // share trial 3. This used to panic via `split_off` + re-indexing
        // into the truncated vector.
        let (lower, upper) = ledger.get_quantile(0.6);
        assert_eq!(lower.len(), 3);
        assert_eq!(upper.len(), 3);
        assert_eq!(upper[0].id, TrialId(3));
        assert_eq!(lower[2].id, TrialId(3));
    }
}
