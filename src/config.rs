//! Startup configuration for the scheduler/tuner pair
//!
//! Mirrors the shape of `knhk-consensus`'s `ConsensusConfig`: a plain struct
//! with a `Default` impl and a `validate()` that rejects arithmetically
//! impossible setups before anything is constructed.

use serde::{Deserialize, Serialize};

/// The fixed phase grid plus the handful of tunable constants spec.md calls
/// out explicitly (STOP_ITERATION, PHASE_ITERATION, quantile ratio, and the
/// late-phase switchover coefficient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-trial iteration budget.
    pub stop_iteration: u64,
    /// Iterations per phase.
    pub phase_iteration: u64,
    /// Number of CPU workers to provision.
    pub num_cpu_workers: usize,
    /// Number of GPU workers to provision.
    pub num_gpu_workers: usize,
    /// Population size (number of trials).
    pub population_size: usize,
    /// Per-worker concurrent slot count.
    pub slots_per_worker: usize,
    /// Quantile ratio used to select mutation donors (spec default 0.25).
    pub mutation_quantile_ratio: f64,
    /// Coefficient in the switchover condition
    /// `completed > population_size - coefficient * num_gpu_workers`.
    pub switchover_coefficient: usize,
    /// Poll timeout, in milliseconds, for the any-of completion wait.
    pub poll_timeout_ms: u64,
    /// RNG seed for deterministic mutation donor selection in tests.
    pub rng_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stop_iteration: 100,
            phase_iteration: 10,
            num_cpu_workers: 2,
            num_gpu_workers: 1,
            population_size: 8,
            slots_per_worker: 1,
            mutation_quantile_ratio: 0.25,
            switchover_coefficient: 3,
            poll_timeout_ms: 500,
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration constraints.
    ///
    /// A population of fewer than 4 trials can make `get_quantile`'s `k == 0`
    /// fallback degenerate (an empty `upper` quantile), so we require at
    /// least 4 trials, matching spec.md §7's stated precondition.
    pub fn validate(&self) -> Result<(), String> {
        if self.population_size < 4 {
            return Err(format!(
                "population_size ({}) must be >= 4 so mutation always finds a donor",
                self.population_size
            ));
        }

        if self.num_cpu_workers + self.num_gpu_workers == 0 {
            return Err("at least one worker (CPU or GPU) is required".to_string());
        }

        if self.phase_iteration == 0 {
            return Err("phase_iteration must be > 0".to_string());
        }

        if self.stop_iteration < self.phase_iteration {
            return Err(format!(
                "stop_iteration ({}) must be >= phase_iteration ({})",
                self.stop_iteration, self.phase_iteration
            ));
        }

        if !(0.0..=1.0).contains(&self.mutation_quantile_ratio) {
            return Err(format!(
                "mutation_quantile_ratio ({}) must be within [0, 1]",
                self.mutation_quantile_ratio
            ));
        }

        if self.slots_per_worker == 0 {
            return Err("slots_per_worker must be > 0".to_string());
        }

        Ok(())
    }

    /// Maximum phase a population can reach under this configuration.
    pub fn max_phase(&self) -> u64 {
        self.stop_iteration / self.phase_iteration
    }

    /// Load configuration from a TOML file, falling back to defaults for any
    /// field a partial file omits is not supported here (a full `toml` file
    /// must specify every field) — matching `knhk-config`'s plain
    /// `toml::from_str` deserialization into a concrete struct.
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        toml::from_str(input).map_err(|e| format!("invalid config TOML: {e}"))
    }
}
