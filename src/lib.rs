//! pbt_scheduler — distributed trial scheduler for population-based
//! hyperparameter optimization.
//!
//! The crate is organized the way the teacher's `knhk-consensus` is: a flat
//! module per concern, wired together by the top-level run entry point
//! (`Tuner`) rather than a god object.

pub mod config;
pub mod error;
pub mod logging;
pub mod phase;
pub mod result;
pub mod scheduler;
pub mod trial;
pub mod tuner;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use scheduler::{RunReport, Scheduler};
pub use trial::{TrialId, TrialState, TrialStatus};
pub use tuner::Tuner;

/// Crate version, surfaced in the CLI's `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
