//! Core trial data model
//!
//! `TrialState` and friends are the value-copyable records that cross
//! Scheduler/Tuner/Worker boundaries by clone, the way `BFTMessage` crosses
//! node boundaries in the teacher's PBFT implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one trial, stable for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrialId(pub u64);

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trial-{}", self.0)
    }
}

/// Unique identifier for one worker, assigned at scheduler construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker-{}", self.0)
    }
}

/// Opaque handle to a saved model checkpoint. The storage backing it lives
/// wherever workers write checkpoints -- an external concern this crate
/// never inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHandle(pub Uuid);

impl CheckpointHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The device family a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    Cpu,
    Gpu,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Cpu => write!(f, "CPU"),
            WorkerKind::Gpu => write!(f, "GPU"),
        }
    }
}

/// Model family a trial trains. Opaque to the scheduler except during
/// mutation, where it is inherited verbatim from the donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Resnet18,
    Resnet34,
    Vgg16,
    Custom(String),
}

/// The hyperparameter record a trial carries. Opaque to the scheduler except
/// during mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub lr: f64,
    pub momentum: f64,
    pub batch_size: u32,
    pub model_type: ModelType,
}

/// Lifecycle status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Pause,
    NeedMutation,
    Terminate,
}

/// Per-device-family iteration contribution, `{CPU -> int, GPU -> int}` in
/// spec.md's terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIterationCount {
    pub cpu: u64,
    pub gpu: u64,
}

impl DeviceIterationCount {
    pub fn get(&self, kind: WorkerKind) -> u64 {
        match kind {
            WorkerKind::Cpu => self.cpu,
            WorkerKind::Gpu => self.gpu,
        }
    }

    pub fn add(&mut self, kind: WorkerKind, delta: u64) {
        match kind {
            WorkerKind::Cpu => self.cpu += delta,
            WorkerKind::Gpu => self.gpu += delta,
        }
    }
}

/// The mutable record for one trial. Passed by value between components;
/// ownership transfers to whichever component currently holds the
/// authoritative copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialState {
    pub id: TrialId,
    pub hyperparameter: Hyperparameter,
    pub checkpoint: Option<CheckpointHandle>,
    pub iteration: u64,
    pub stop_iteration: u64,
    pub phase: u64,
    pub accuracy: f64,
    pub status: TrialStatus,
    /// `None` encodes spec.md's `worker_id = -1`.
    pub worker_id: Option<WorkerId>,
    /// `None` encodes spec.md's `WorkerType.NONE`.
    pub worker_type: Option<WorkerKind>,
    pub device_iteration_count: DeviceIterationCount,
}

impl TrialState {
    /// Construct a fresh, unassigned, pending trial.
    pub fn new(id: TrialId, hyperparameter: Hyperparameter, stop_iteration: u64) -> Self {
        Self {
            id,
            hyperparameter,
            checkpoint: None,
            iteration: 0,
            stop_iteration,
            phase: 0,
            accuracy: 0.0,
            status: TrialStatus::Pending,
            worker_id: None,
            worker_type: None,
            device_iteration_count: DeviceIterationCount::default(),
        }
    }

    /// Clear worker assignment, returning the trial to an unassigned state.
    /// Called by the scheduler after every completion is routed.
    pub fn clear_assignment(&mut self) {
        self.worker_id = None;
        self.worker_type = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status == TrialStatus::Terminate
    }
}

/// A convenience alias used by the ledger and quantile queries.
pub type TrialMap = HashMap<TrialId, TrialState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn hp() -> Hyperparameter {
        Hyperparameter {
            lr: 0.1,
            momentum: 0.9,
            batch_size: 64,
            model_type: ModelType::Resnet18,
        }
    }

    #[test]
    fn new_trial_is_pending_and_unassigned() {
        let t = TrialState::new(TrialId(1), hp(), 100);
        assert_eq!(t.status, TrialStatus::Pending);
        assert!(t.worker_id.is_none());
        assert!(t.worker_type.is_none());
        assert_eq!(t.iteration, 0);
    }

    #[test]
    fn clear_assignment_resets_worker_fields() {
        let mut t = TrialState::new(TrialId(1), hp(), 100);
        t.worker_id = Some(WorkerId(2));
        t.worker_type = Some(WorkerKind::Gpu);
        t.clear_assignment();
        assert!(t.worker_id.is_none());
        assert!(t.worker_type.is_none());
    }

    #[test]
    fn device_iteration_count_tracks_per_kind() {
        let mut d = DeviceIterationCount::default();
        d.add(WorkerKind::Cpu, 3);
        d.add(WorkerKind::Gpu, 5);
        assert_eq!(d.get(WorkerKind::Cpu), 3);
        assert_eq!(d.get(WorkerKind::Gpu), 5);
    }
}
