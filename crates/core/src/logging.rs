//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directives used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,ember_renderer=debug,ember_rhi=info,ember_platform=info";

/// Initialize the logging system with tracing.
///
/// Filtering follows `RUST_LOG` when present, otherwise [`DEFAULT_FILTER`].
/// Calling this more than once is harmless; later calls are ignored.
///
/// # Example
/// ```
/// ember_core::init_logging();
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
