// SPDX-License-Identifier: GPL-3.0-only

//! Log subscriber setup for binaries and tests embedding the crate

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset or invalid.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_level(true)
        .try_init()
        .is_ok()
}
