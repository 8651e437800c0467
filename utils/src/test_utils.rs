//! Helpers for tests of the ledger client crates.

use std::sync::Once;

pub use tokio::test as async_test;

/// Install a `fmt` subscriber writing to the test output.
///
/// The level comes from `RUST_LOG` (`trace` .. `error`) and defaults to `WARN`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.to_lowercase())
            .and_then(|value| match value.as_str() {
                "trace" => Some(tracing::Level::TRACE),
                "debug" => Some(tracing::Level::DEBUG),
                "info" => Some(tracing::Level::INFO),
                "warn" => Some(tracing::Level::WARN),
                "error" => Some(tracing::Level::ERROR),
                _ => None,
            })
            .unwrap_or(tracing::Level::WARN);
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(level)
            .try_init();
    });
}
