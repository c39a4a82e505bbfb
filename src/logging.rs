//! Tracing subscriber installation
//!
//! One-shot setup for the CLI binary and for integration tests, in the
//! shape of the teacher's own `init_tracing` (`knhk-swarm::lib`), extended
//! with an `EnvFilter` so `RUST_LOG` controls verbosity the way `knhk-cli`
//! wires it.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info` when unset. Safe to call more than once; subsequent calls are
/// no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
