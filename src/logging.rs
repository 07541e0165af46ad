//! Subscriber setup for binaries and tests embedding the engine.
//!
//! The engine itself only emits `tracing` events. Install a subscriber once
//! at startup to see them:
//!
//! ```no_run
//! task_engine::logging::init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `info`. Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
