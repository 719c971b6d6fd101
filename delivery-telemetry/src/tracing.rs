//! Tracing initialization for binaries and tests.

use std::sync::Once;

use ::tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive used when `RUST_LOG` is not set.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Guards test tracing so that it is installed at most once per process.
static INIT_TEST_TRACING: Once = Once::new();

/// Builds the [`EnvFilter`], honouring `RUST_LOG` and falling back to `{app_name}=info,info`.
fn env_filter(app_name: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{app_name}={DEFAULT_LOG_LEVEL},{DEFAULT_LOG_LEVEL}").into())
}

/// Initializes structured logging for a binary.
///
/// Returns an error if a global subscriber was already installed.
pub fn init_tracing(app_name: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(app_name))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    info!(app_name, "tracing initialized");

    Ok(())
}

/// Initializes tracing for tests.
///
/// Output goes through the test writer so that it is captured per test, and repeated calls
/// from different tests are no-ops.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

        // Another test harness may have installed a subscriber already, which is fine.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
