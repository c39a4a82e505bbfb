//! Tuner
//!
//! Hosts the `TrialResult` ledger, services the Scheduler's narrow RPC
//! surface, owns the worker pool, and is the run entry point -- the
//! counterpart of the teacher's `AgentSwarm` (`knhk-swarm::core::swarm`),
//! which validates config, owns pools of sub-actors, and exposes a
//! `run`/`shutdown` pair.

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::result::TrialResult;
use crate::scheduler::{RunReport, Scheduler};
use crate::trial::{TrialState, WorkerId, WorkerKind};
use crate::worker::{SyntheticTrainStep, TrainStep, Worker, WorkerHandle, WorkerLog};
use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The minimal capability the Scheduler needs from the Tuner, breaking the
/// Tuner/Scheduler reference cycle spec.md §9 calls out: the Scheduler never
/// sees the full `Tuner`, only this trait.
pub trait TunerFacing: Send + Sync {
    fn get_trial_progress(&self) -> Vec<TrialState>;
    fn mutation(&self, ts: TrialState) -> Result<TrialState>;
    fn record_trial_progress(&self, ts: TrialState);
}

/// Archives a completed run's per-worker logs. A pure filesystem
/// operation, kept behind a trait so the core scheduling logic never
/// touches disk directly -- spec.md §6 calls this out as an external
/// boundary.
pub trait LogArchive: Send + Sync {
    fn package(&self, logs: &[WorkerLog]) -> Result<Vec<u8>>;
}

/// `zip`-backed implementation of `LogArchive`, grounded on the `zip` crate
/// usage found elsewhere in the retrieval pack (`zed-industries-codex`).
pub struct ZipLogArchive;

impl LogArchive for ZipLogArchive {
    fn package(&self, logs: &[WorkerLog]) -> Result<Vec<u8>> {
        if logs.is_empty() {
            return Err(SchedulerError::LogArchiveMissing);
        }

        let mut buffer = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buffer);
            let mut writer = zip::ZipWriter::new(cursor);
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            for log in logs {
                writer.start_file(format!("worker-{}.log", log.id), options)?;
                writer.write_all(log.content.as_bytes())?;
            }
            writer.finish()?;
        }
        Ok(buffer)
    }
}

/// The Tuner: run entry point for one tuning session.
pub struct Tuner {
    ledger: TrialResult,
    config: SchedulerConfig,
    workers: Vec<WorkerHandle>,
    rng: parking_lot::Mutex<rand::rngs::StdRng>,
    log_archive: Box<dyn LogArchive>,
}

impl Tuner {
    /// Construct the worker pool and the ledger for `trial_states`.
    pub fn new(config: SchedulerConfig, trial_states: Vec<TrialState>) -> Result<Self> {
        config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        let ledger = TrialResult::new();
        for ts in &trial_states {
            ledger.record_trial_progress(ts.clone());
        }

        if ledger.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "no trial states supplied".to_string(),
            ));
        }
        if ledger.len() != config.population_size {
            return Err(SchedulerError::InvalidConfig(format!(
                "got {} trial states but population_size is {}",
                ledger.len(),
                config.population_size
            )));
        }

        let workers = build_worker_pool(&config);

        info!(
            population = ledger.len(),
            cpu_workers = config.num_cpu_workers,
            gpu_workers = config.num_gpu_workers,
            "tuner constructed"
        );

        let seed = config.rng_seed.unwrap_or(0);
        Ok(Self {
            ledger,
            config,
            workers,
            rng: parking_lot::Mutex::new(<rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(
                seed,
            )),
            log_archive: Box::new(ZipLogArchive),
        })
    }

    /// Run the tuning session to completion: builds a Scheduler over the
    /// worker pool and drives it, then collects and returns the run report.
    ///
    /// The initial pending population is exactly what was handed to
    /// `Tuner::new` -- read back from the ledger rather than threaded
    /// through separately, since `new` already recorded it there.
    pub async fn run(self: &Arc<Self>) -> Result<RunReport> {
        info!("tuning run starting");
        let trial_states = self.ledger.get_trial_progress();
        let scheduler = Scheduler::new(
            self.clone(),
            self.workers.clone(),
            trial_states,
            self.config.clone(),
        );
        let report = scheduler.run().await?;
        info!(completed = report.completed, total = report.total, "tuning run finished");
        Ok(report)
    }

    /// `get_quantile(ratio)`
    pub fn get_quantile(&self, ratio: f64) -> (Vec<TrialState>, Vec<TrialState>) {
        self.ledger.get_quantile(ratio)
    }

    /// `update_trial_result(ts)`: proxies and logs the current best.
    pub fn update_trial_result(&self, ts: TrialState) {
        self.ledger.update_trial_result(ts);
        if let Some((accuracy, id)) = self.ledger.history_best() {
            info!(%id, accuracy, "history best");
        }
    }

    /// Package every worker's log into a single zip archive.
    pub async fn get_zipped_log(&self) -> Result<Vec<u8>> {
        let mut logs = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            logs.push(worker.get_log_file().await);
        }
        self.log_archive.package(&logs)
    }

    /// Write the zipped log archive to `path`, the filesystem-touching half
    /// of `get_zipped_log` the CLI entry point uses.
    pub async fn write_zipped_log(&self, path: &Path) -> Result<PathBuf> {
        let bytes = self.get_zipped_log().await?;
        std::fs::write(path, bytes)?;
        Ok(path.to_path_buf())
    }
}

impl TunerFacing for Tuner {
    fn get_trial_progress(&self) -> Vec<TrialState> {
        self.ledger.get_trial_progress()
    }

    /// `mutation(ts)`: clone a uniformly random donor from the upper
    /// quantile, apply the deterministic perturbation, and return the
    /// mutated trial.
    fn mutation(&self, mut ts: TrialState) -> Result<TrialState> {
        info!(trial = %ts.id, hyperparameter = ?ts.hyperparameter, "mutation starting");

        let (_, upper) = self.ledger.get_quantile(self.config.mutation_quantile_ratio);
        if upper.is_empty() {
            return Err(SchedulerError::EmptyDonorSet);
        }

        let donor = {
            let mut rng = self.rng.lock();
            let index = rng.gen_range(0..upper.len());
            upper[index].clone()
        };

        let mut hyperparameter = donor.hyperparameter.clone();
        hyperparameter.lr *= 0.8;
        hyperparameter.momentum *= 1.2;

        ts.hyperparameter = hyperparameter;
        ts.checkpoint = donor.checkpoint;

        info!(
            trial = %ts.id,
            iteration = ts.iteration,
            hyperparameter = ?ts.hyperparameter,
            donor = %donor.id,
            "mutation finished"
        );

        Ok(ts)
    }

    fn record_trial_progress(&self, ts: TrialState) {
        self.ledger.record_trial_progress(ts);
        self.ledger.display_trial_progress();
    }
}

fn build_worker_pool(config: &SchedulerConfig) -> Vec<WorkerHandle> {
    let mut workers = Vec::with_capacity(config.num_cpu_workers + config.num_gpu_workers);
    let mut next_id = 0u64;

    let seed = config.rng_seed.unwrap_or(0);
    let train_step: Arc<dyn TrainStep> = Arc::new(SyntheticTrainStep::new(seed, 0.0));

    for _ in 0..config.num_cpu_workers {
        let worker = Arc::new(Worker::new(
            WorkerId(next_id),
            WorkerKind::Cpu,
            config.slots_per_worker,
            config.phase_iteration,
            train_step.clone(),
        ));
        workers.push(worker.handle());
        next_id += 1;
    }

    for _ in 0..config.num_gpu_workers {
        let worker = Arc::new(Worker::new(
            WorkerId(next_id),
            WorkerKind::Gpu,
            config.slots_per_worker,
            config.phase_iteration,
            train_step.clone(),
        ));
        workers.push(worker.handle());
        next_id += 1;
    }

    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::{CheckpointHandle, Hyperparameter, ModelType, TrialId, TrialStatus};

    fn hp(lr: f64, momentum: f64) -> Hyperparameter {
        Hyperparameter {
            lr,
            momentum,
            batch_size: 32,
            model_type: ModelType::Resnet18,
        }
    }

    fn seeded_tuner(population: Vec<TrialState>) -> Tuner {
        let mut config = SchedulerConfig {
            population_size: population.len(),
            ..Default::default()
        };
        config.rng_seed = Some(7);
        Tuner::new(config, population).unwrap()
    }

    #[test]
    fn mutation_copies_donor_checkpoint_and_perturbs_hyperparameters() {
        let mut donor = TrialState::new(TrialId(1), hp(0.5, 0.5), 100);
        donor.accuracy = 0.99;
        donor.checkpoint = Some(CheckpointHandle::new());

        let mut low1 = TrialState::new(TrialId(2), hp(0.1, 0.1), 100);
        low1.accuracy = 0.1;
        let mut low2 = TrialState::new(TrialId(3), hp(0.2, 0.2), 100);
        low2.accuracy = 0.2;
        let mut low3 = TrialState::new(TrialId(4), hp(0.3, 0.3), 100);
        low3.accuracy = 0.3;

        let tuner = seeded_tuner(vec![donor.clone(), low1, low2, low3]);

        let mut target = TrialState::new(TrialId(5), hp(0.9, 0.9), 100);
        target.status = TrialStatus::NeedMutation;

        let mutated = tuner.mutation(target).unwrap();
        assert_eq!(mutated.checkpoint, donor.checkpoint);
        assert!((mutated.hyperparameter.lr - donor.hyperparameter.lr * 0.8).abs() < 1e-9);
        assert!(
            (mutated.hyperparameter.momentum - donor.hyperparameter.momentum * 1.2).abs() < 1e-9
        );
    }

    #[test]
    fn update_trial_result_tracks_history_best() {
        let a = TrialState::new(TrialId(1), hp(0.1, 0.1), 100);
        let b = TrialState::new(TrialId(2), hp(0.1, 0.1), 100);
        let c = TrialState::new(TrialId(3), hp(0.1, 0.1), 100);
        let d = TrialState::new(TrialId(4), hp(0.1, 0.1), 100);
        let tuner = seeded_tuner(vec![a, b, c, d]);

        let mut best = TrialState::new(TrialId(5), hp(0.1, 0.1), 100);
        best.accuracy = 0.77;
        tuner.update_trial_result(best);
        assert_eq!(tuner.ledger.history_best(), Some((0.77, TrialId(5))));
    }

    #[test]
    fn new_rejects_trial_states_that_do_not_match_population_size() {
        let population = vec![
            TrialState::new(TrialId(1), hp(0.1, 0.1), 100),
            TrialState::new(TrialId(2), hp(0.1, 0.1), 100),
            TrialState::new(TrialId(3), hp(0.1, 0.1), 100),
            TrialState::new(TrialId(4), hp(0.1, 0.1), 100),
        ];
        let config = SchedulerConfig {
            population_size: 5,
            ..Default::default()
        };
        assert!(Tuner::new(config, population).is_err());
    }

    #[tokio::test]
    async fn write_zipped_log_writes_a_real_zip_file_to_disk() {
        let population: Vec<_> = (1..=4)
            .map(|i| TrialState::new(TrialId(i), hp(0.1, 0.1), 100))
            .collect();
        let tuner = seeded_tuner(population);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker-logs.zip");

        let written = tuner.write_zipped_log(&path).await.unwrap();
        assert_eq!(written, path);

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(&bytes[..4], b"PK\x03\x04", "not a valid zip local-file header");
    }
}
