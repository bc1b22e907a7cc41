//! Tracing bootstrap for hosts embedding the entry store.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered at `level` unless `RUST_LOG` is set.
///
/// Returns `false` when a global subscriber was already installed, which is
/// not treated as an error so tests and hosts can both call this.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
