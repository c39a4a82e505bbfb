//! Error types for the trial scheduler

use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Comprehensive error types for scheduler/tuner operations
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A worker's completion handle resolved with an error instead of a `TrialState`.
    #[error("completion failed for trial {trial_id}: {reason}")]
    CompletionFailed { trial_id: u64, reason: String },

    /// A completion returned `TrialStatus::Running`, or a worker_id/worker_type
    /// mismatch was observed on re-queue. Fatal.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// `get_quantile` returned an empty donor set during mutation. Only
    /// possible when the population has fewer than 4 trials.
    #[error("no mutation donor available in upper quantile (population too small)")]
    EmptyDonorSet,

    /// No log directory was found when packaging the run's logs.
    #[error("log directory not found, cannot package archive")]
    LogArchiveMissing,

    /// The run ended with fewer completed trials than the population size.
    #[error("run ended with {completed}/{total} trials completed")]
    IncompleteRun { completed: usize, total: usize },

    /// Invalid configuration supplied at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl SchedulerError {
    /// Transient dispatch errors (a worker failing to answer a slot query) are
    /// swallowed by the caller rather than surfaced through this type; this
    /// predicate covers the remaining cases that a caller of `Tuner::run` may
    /// reasonably choose to treat as non-fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SchedulerError::CompletionFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_failed_is_recoverable() {
        let err = SchedulerError::CompletionFailed {
            trial_id: 3,
            reason: "worker crashed".into(),
        };
        assert!(err.is_recoverable());
    }

    #[test]
    fn invariant_violation_is_not_recoverable() {
        let err = SchedulerError::InvariantViolation("status Running on completion".into());
        assert!(!err.is_recoverable());
    }
}
