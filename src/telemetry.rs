//! Opt-in tracing setup for binaries, examples, and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedding application's choice. This helper wires the common
//! env-filtered fmt stack so small programs do not have to.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install an env-filtered fmt subscriber for the whole process.
///
/// Honors `RUST_LOG` (falling back to `default_filter` when unset) and loads
/// a `.env` file first so filter settings can live there. Calling it twice
/// is a no-op: the second `try_init` fails quietly.
///
/// # Examples
///
/// ```
/// topicflow::telemetry::init("topicflow=info");
/// ```
pub fn init(default_filter: &str) {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
