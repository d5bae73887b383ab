//! Tracing output for tests.

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber. The first call wins; later calls are no-ops.
/// Honors `RUST_LOG`, defaulting to `debug` for this crate.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("heap_timers=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}
