//! Scheduler — dispatch loop, strategies, and completion demultiplexer
//!
//! Translated from `original_source/src/trial_scheduler.py`
//! (`TrialScheduler`, `round_robin_strategy`, `gpu_first_strategy`,
//! `handle_done_futures`) into the teacher's async-actor idiom.

use crate::error::{Result, SchedulerError};
use crate::phase::TrialPhase;
use crate::trial::{TrialId, TrialState, TrialStatus};
use crate::tuner::TunerFacing;
use crate::worker::{TrialCompletion, WorkerHandle};
use crate::config::SchedulerConfig;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Outcome of one strategy invocation, per spec.md §9's Design Notes: an
/// enumerated result rather than a bare `Option`, so the scheduler can log
/// and account for preemptions uniformly alongside assignments.
pub enum StrategyOutcome {
    Assigned(TrialCompletion),
    Preempted(TrialId),
    Idle,
}

/// Summary of a completed (or abandoned) tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    pub total: usize,
}

impl RunReport {
    pub fn fully_completed(&self) -> bool {
        self.completed == self.total
    }
}

/// Pick the pending trial with the largest `iteration`, filtering to those
/// whose `phase <= current_phase`. Returns the index into `pending`.
fn max_iteration_eligible(pending: &[TrialState], current_phase: u64) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .filter(|(_, t)| t.phase <= current_phase)
        .max_by_key(|(_, t)| t.iteration)
        .map(|(i, _)| i)
}

fn min_iteration(pending: &[TrialState]) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .min_by_key(|(_, t)| t.iteration)
        .map(|(i, _)| i)
}

/// Round-robin strategy (spec.md §4.4): favor CPUs with an eligible
/// closest-to-done candidate, fall back to GPUs advancing the most-behind
/// trial.
async fn round_robin_strategy(
    pending: &mut Vec<TrialState>,
    gpu_workers: &[WorkerHandle],
    cpu_workers: &[WorkerHandle],
    phase: &TrialPhase,
) -> StrategyOutcome {
    for worker in cpu_workers {
        if worker.available_slots().await > 0 {
            if let Some(idx) = max_iteration_eligible(pending, phase.current_phase()) {
                let trial = pending.remove(idx);
                let completion = worker.assign_trial(trial).await;
                return StrategyOutcome::Assigned(completion);
            }
            break;
        }
    }

    let mut best: Option<(WorkerHandle, usize)> = None;
    for worker in gpu_workers {
        let slots = worker.available_slots().await;
        if slots > 0 && best.as_ref().map(|(_, s)| slots > *s).unwrap_or(true) {
            best = Some((worker.clone(), slots));
        }
    }

    if let Some((worker, _)) = best {
        if let Some(idx) = min_iteration(pending) {
            let trial = pending.remove(idx);
            let completion = worker.assign_trial(trial).await;
            return StrategyOutcome::Assigned(completion);
        }
    }

    StrategyOutcome::Idle
}

/// GPU-first strategy (spec.md §4.5): exhaust GPU capacity first; once a
/// GPU has a free slot but nothing pending to put on it, or once GPUs are
/// fully saturated, preempt the slowest running CPU trial.
async fn gpu_first_strategy(
    pending: &mut Vec<TrialState>,
    gpu_workers: &[WorkerHandle],
    cpu_workers: &[WorkerHandle],
) -> StrategyOutcome {
    let mut best: Option<(WorkerHandle, usize)> = None;
    for worker in gpu_workers {
        let slots = worker.available_slots().await;
        if slots > 0 && best.as_ref().map(|(_, s)| slots > *s).unwrap_or(true) {
            best = Some((worker.clone(), slots));
        }
    }

    if let Some((worker, _)) = best {
        if let Some(idx) = min_iteration(pending) {
            let trial = pending.remove(idx);
            let completion = worker.assign_trial(trial).await;
            return StrategyOutcome::Assigned(completion);
        }
        return StrategyOutcome::Idle;
    }

    let mut victim: Option<(WorkerHandle, TrialState)> = None;
    for worker in cpu_workers {
        let active = worker.active_trials().await;
        if let Some(slowest) = active.into_iter().min_by_key(|t| t.iteration) {
            let replace = victim
                .as_ref()
                .map(|(_, v)| slowest.iteration < v.iteration)
                .unwrap_or(true);
            if replace {
                victim = Some((worker.clone(), slowest));
            }
        }
    }

    if let Some((worker, trial)) = victim {
        worker.send_signal(trial.id).await;
        return StrategyOutcome::Preempted(trial.id);
    }

    StrategyOutcome::Idle
}

/// The Scheduler: owns the queues, drives the dispatch loop, issues
/// assign/preempt commands to workers, and demultiplexes completions.
pub struct Scheduler {
    tuner: Arc<dyn TunerFacing>,
    cpu_workers: Vec<WorkerHandle>,
    gpu_workers: Vec<WorkerHandle>,
    all_workers: Vec<WorkerHandle>,
    pending: Vec<TrialState>,
    completed: Vec<TrialState>,
    trial_state_nums: usize,
    phase: TrialPhase,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        tuner: Arc<dyn TunerFacing>,
        workers: Vec<WorkerHandle>,
        pending: Vec<TrialState>,
        config: SchedulerConfig,
    ) -> Self {
        let cpu_workers: Vec<_> = workers
            .iter()
            .filter(|w| w.worker_type() == crate::trial::WorkerKind::Cpu)
            .cloned()
            .collect();
        let gpu_workers: Vec<_> = workers
            .iter()
            .filter(|w| w.worker_type() == crate::trial::WorkerKind::Gpu)
            .cloned()
            .collect();

        let trial_state_nums = pending.len();
        let phase = TrialPhase::from_config(&config);

        Self {
            tuner,
            cpu_workers,
            gpu_workers,
            all_workers: workers,
            pending,
            completed: Vec::new(),
            trial_state_nums,
            phase,
            config,
        }
    }

    /// True once `|completed| > N - coefficient * |gpu_workers|` per spec.md
    /// §4.3/§6 -- computed in signed arithmetic since the right-hand side
    /// can be negative.
    fn should_use_gpu_first(&self) -> bool {
        let threshold = self.trial_state_nums as i64
            - (self.config.switchover_coefficient * self.gpu_workers.len()) as i64;
        self.completed.len() as i64 > threshold
    }

    async fn update_phase(&mut self) {
        let progress = self.tuner.get_trial_progress();
        if let Some((old, new)) = self.phase.update_phase(&progress) {
            info!(from = old, to = new, "broadcasting phase advance");
            for worker in &self.all_workers {
                worker.update_phase(new).await;
            }
        }
    }

    /// Run the dispatch loop to completion (or until work is exhausted with
    /// trials unaccounted for).
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<RunReport> {
        let mut running: FuturesUnordered<TrialCompletion> = FuturesUnordered::new();

        while self.completed.len() < self.trial_state_nums {
            self.update_phase().await;

            let outcome = if self.should_use_gpu_first() {
                gpu_first_strategy(&mut self.pending, &self.gpu_workers, &self.cpu_workers).await
            } else {
                round_robin_strategy(
                    &mut self.pending,
                    &self.gpu_workers,
                    &self.cpu_workers,
                    &self.phase,
                )
                .await
            };

            match outcome {
                StrategyOutcome::Assigned(completion) => running.push(completion),
                StrategyOutcome::Preempted(trial_id) => {
                    info!(trial = %trial_id, "preempt signal sent to slowest running CPU trial");
                }
                StrategyOutcome::Idle => {}
            }

            if running.is_empty() && self.pending.is_empty() {
                warn!(
                    completed = self.completed.len(),
                    total = self.trial_state_nums,
                    "work exhausted with trials unaccounted for"
                );
                break;
            }

            let mut finished = Vec::new();
            if !running.is_empty() {
                let deadline = Duration::from_millis(self.config.poll_timeout_ms);
                if let Ok(Some(first)) = tokio::time::timeout(deadline, running.next()).await {
                    finished.push(first);
                    while let Some(Some(more)) = running.next().now_or_never() {
                        finished.push(more);
                    }
                }
            }

            for (trial_id, result) in finished {
                match result {
                    Ok(ts) => self.route_completion(ts)?,
                    Err(err) if err.is_recoverable() => {
                        error!(trial = %trial_id, error = %err, "completion failed, trial lost");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let report = RunReport {
            completed: self.completed.len(),
            total: self.trial_state_nums,
        };

        if !report.fully_completed() {
            return Err(SchedulerError::IncompleteRun {
                completed: report.completed,
                total: report.total,
            });
        }

        Ok(report)
    }

    /// Route one completed `TrialState` by its returned status (spec.md
    /// §4.6).
    ///
    /// Every completion derives `ts.phase` from its (possibly just-advanced)
    /// iteration before routing, since this is the only place a trial's
    /// progress is durably recorded back into the ledger -- `phase` must be
    /// current here for `max_iteration_eligible`'s gating to mean anything.
    fn route_completion(&mut self, mut ts: TrialState) -> Result<()> {
        ts.phase = ts.iteration / self.config.phase_iteration;
        match ts.status {
            TrialStatus::Terminate => {
                info!(trial = %ts.id, accuracy = ts.accuracy, "trial done");
                ts.clear_assignment();
                self.tuner.record_trial_progress(ts.clone());
                self.completed.push(ts);
            }
            TrialStatus::NeedMutation => {
                let mut mutated = self.tuner.mutation(ts)?;
                mutated.status = TrialStatus::Pending;
                mutated.clear_assignment();
                self.tuner.record_trial_progress(mutated.clone());
                self.pending.push(mutated);
            }
            TrialStatus::Pause => {
                info!(
                    trial = %ts.id,
                    iteration = ts.iteration,
                    accuracy = ts.accuracy,
                    "trial paused, re-queued"
                );
                ts.status = TrialStatus::Pending;
                ts.clear_assignment();
                self.tuner.record_trial_progress(ts.clone());
                self.pending.push(ts);
            }
            TrialStatus::Pending => {
                warn!(trial = %ts.id, "assignment collision, re-queued unchanged");
                ts.clear_assignment();
                self.tuner.record_trial_progress(ts.clone());
                self.pending.push(ts);
            }
            TrialStatus::Running => {
                return Err(SchedulerError::InvariantViolation(format!(
                    "trial {} completed with status Running",
                    ts.id
                )));
            }
        }
        Ok(())
    }
}
