//! Tracing subscriber setup
//!
//! Hosts that already install a subscriber can skip this; `init` leaves an
//! existing global subscriber in place.

use tracing_subscriber::EnvFilter;

use crate::config::ModelConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`
///
/// Falls back to `debug` when `config.debug` is set, `info` otherwise.
///
/// # Returns
/// `true` if this call installed the subscriber
pub fn init(config: &ModelConfig) -> bool {
    let fallback = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized (fallback level {})", fallback);
    }
    installed
}
