//! Worker actor
//!
//! Each worker (CPU or GPU) is a small async actor whose mutable interior
//! lives behind `Arc<tokio::sync::RwLock<_>>` fields, the way the teacher's
//! `GossipProtocol` (`knhk-consensus::gossip::protocol`) and `WorkerAgent`
//! (`knhk-swarm::agents::worker`) hold their state. `assign_trial` spawns a
//! `tokio::task` whose `JoinHandle` is the spec's "completion handle".

use crate::error::{Result, SchedulerError};
use crate::trial::{TrialId, TrialState, TrialStatus, WorkerId, WorkerKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

/// A completion handle: resolves to the trial's new state, or an error if
/// the worker task failed (e.g. panicked).
pub type TrialCompletion =
    Pin<Box<dyn Future<Output = (TrialId, Result<TrialState>)> + Send>>;

/// Outcome of running one simulated training step.
#[derive(Debug, Clone, Copy)]
pub struct TrainStepOutcome {
    pub iterations_completed: u64,
    pub accuracy: f64,
    pub needs_mutation: bool,
}

/// The out-of-scope training step / dataloader / model boundary. Spec.md §1
/// explicitly excludes the training step itself from this crate's scope;
/// this trait is the seam a real trainer would implement.
pub trait TrainStep: Send + Sync {
    fn step(&self, trial: &TrialState, device: WorkerKind) -> TrainStepOutcome;
}

/// A deterministic stand-in for a real trainer: advances iteration by one
/// unit per call, perturbs accuracy with a small seeded random walk, and
/// occasionally recommends mutation so the NEED_MUTATION path is exercised.
pub struct SyntheticTrainStep {
    rng: parking_lot::Mutex<StdRng>,
    mutation_probability: f64,
}

impl SyntheticTrainStep {
    pub fn new(seed: u64, mutation_probability: f64) -> Self {
        Self {
            rng: parking_lot::Mutex::new(StdRng::seed_from_u64(seed)),
            mutation_probability,
        }
    }
}

impl TrainStep for SyntheticTrainStep {
    fn step(&self, trial: &TrialState, _device: WorkerKind) -> TrainStepOutcome {
        let mut rng = self.rng.lock();
        let noise: f64 = rng.gen_range(-0.02..0.05);
        let needs_mutation = rng.gen_bool(self.mutation_probability);
        TrainStepOutcome {
            iterations_completed: 1,
            accuracy: (trial.accuracy + noise).clamp(0.0, 1.0),
            needs_mutation,
        }
    }
}

/// Snapshot of a worker's log, handed to the Tuner's external log-archival
/// boundary.
#[derive(Debug, Clone)]
pub struct WorkerLog {
    pub id: WorkerId,
    pub content: String,
}

struct WorkerInner {
    active: HashMap<TrialId, TrialState>,
    preempt_signals: HashMap<TrialId, Arc<Notify>>,
    slots_in_use: usize,
    current_phase: u64,
    log_lines: Vec<String>,
}

/// A worker actor: owns a fixed number of execution slots of one device kind.
pub struct Worker {
    id: WorkerId,
    kind: WorkerKind,
    slots: usize,
    phase_iteration: u64,
    train_step: Arc<dyn TrainStep>,
    inner: Arc<RwLock<WorkerInner>>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        kind: WorkerKind,
        slots: usize,
        phase_iteration: u64,
        train_step: Arc<dyn TrainStep>,
    ) -> Self {
        Self {
            id,
            kind,
            slots,
            phase_iteration,
            train_step,
            inner: Arc::new(RwLock::new(WorkerInner {
                active: HashMap::new(),
                preempt_signals: HashMap::new(),
                slots_in_use: 0,
                current_phase: 0,
                log_lines: Vec::new(),
            })),
        }
    }

    pub fn handle(self: &Arc<Self>) -> WorkerHandle {
        WorkerHandle { worker: self.clone() }
    }
}

/// A cheaply cloneable reference to a worker, exposing exactly the
/// operations spec.md §6 lists for the worker interface.
#[derive(Clone)]
pub struct WorkerHandle {
    worker: Arc<Worker>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.worker.id
    }

    /// `get_worker_type()`
    pub fn worker_type(&self) -> WorkerKind {
        self.worker.kind
    }

    /// `get_available_slots()`
    pub async fn available_slots(&self) -> usize {
        let inner = self.worker.inner.read().await;
        self.worker.slots.saturating_sub(inner.slots_in_use)
    }

    /// `get_active_trials()`
    pub async fn active_trials(&self) -> Vec<TrialState> {
        let inner = self.worker.inner.read().await;
        inner.active.values().cloned().collect()
    }

    /// `assign_trial(ts)`
    ///
    /// Runs the trial forward one scheduling unit: up to the next phase
    /// boundary, or until `stop_iteration`, whichever is sooner, aborting
    /// early on a preempt signal or a trainer-recommended mutation.
    pub async fn assign_trial(&self, mut ts: TrialState) -> TrialCompletion {
        let worker = self.worker.clone();
        let trial_id = ts.id;
        let notify = Arc::new(Notify::new());

        {
            let mut inner = worker.inner.write().await;
            inner.slots_in_use += 1;
            inner.preempt_signals.insert(trial_id, notify.clone());
            ts.status = TrialStatus::Running;
            ts.worker_id = Some(worker.id);
            ts.worker_type = Some(worker.kind);
            inner.active.insert(trial_id, ts.clone());
        }

        let fut = async move {
            let unit_target = std::cmp::min(
                ts.stop_iteration,
                ((ts.iteration / worker.phase_iteration) + 1) * worker.phase_iteration,
            );

            let mut preempted = false;
            let mut needs_mutation = false;

            while ts.iteration < unit_target {
                tokio::select! {
                    biased;
                    _ = notify.notified() => {
                        preempted = true;
                        break;
                    }
                    () = tokio::time::sleep(Duration::from_micros(1)) => {
                        let outcome = worker.train_step.step(&ts, worker.kind);
                        ts.iteration = (ts.iteration + outcome.iterations_completed)
                            .min(ts.stop_iteration);
                        ts.accuracy = outcome.accuracy;
                        ts.device_iteration_count
                            .add(worker.kind, outcome.iterations_completed);
                        if outcome.needs_mutation {
                            needs_mutation = true;
                            break;
                        }
                    }
                }
            }

            ts.status = if preempted {
                debug!(trial = %trial_id, worker = %worker.id, "preempted");
                TrialStatus::Pause
            } else if needs_mutation {
                TrialStatus::NeedMutation
            } else if ts.iteration >= ts.stop_iteration {
                TrialStatus::Terminate
            } else {
                TrialStatus::Pause
            };

            {
                let mut inner = worker.inner.write().await;
                inner.active.remove(&trial_id);
                inner.preempt_signals.remove(&trial_id);
                inner.slots_in_use = inner.slots_in_use.saturating_sub(1);
                inner.log_lines.push(format!(
                    "trial {} -> {:?} at iteration {}",
                    trial_id, ts.status, ts.iteration
                ));
            }

            (trial_id, Ok(ts))
        };

        let handle = tokio::spawn(fut);
        Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => (
                    trial_id,
                    Err(SchedulerError::CompletionFailed {
                        trial_id: trial_id.0,
                        reason: join_err.to_string(),
                    }),
                ),
            }
        })
    }

    /// `send_signal(trial_id)`. Returns whether the trial was found and
    /// signalled; a signal for an already-finished or unknown trial is a
    /// harmless no-op (the preempt-after-finish race of spec.md §5/§8).
    pub async fn send_signal(&self, trial_id: TrialId) -> bool {
        let inner = self.worker.inner.read().await;
        if let Some(notify) = inner.preempt_signals.get(&trial_id) {
            notify.notify_one();
            true
        } else {
            warn!(trial = %trial_id, worker = %self.worker.id, "preempt signal for unknown/finished trial ignored");
            false
        }
    }

    /// `update_phase(phase)`
    pub async fn update_phase(&self, phase: u64) {
        let mut inner = self.worker.inner.write().await;
        inner.current_phase = phase;
        info!(worker = %self.worker.id, phase, "worker phase updated");
    }

    /// The phase this worker last observed via `update_phase`.
    pub async fn current_phase(&self) -> u64 {
        self.worker.inner.read().await.current_phase
    }

    /// `get_log_file()`
    pub async fn get_log_file(&self) -> WorkerLog {
        let inner = self.worker.inner.read().await;
        WorkerLog {
            id: self.worker.id,
            content: inner.log_lines.join("\n"),
        }
    }
}
