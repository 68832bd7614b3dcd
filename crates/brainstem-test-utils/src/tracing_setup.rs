//! Log capture for tests.
//!
//! [`TestDaemon`](crate::TestDaemon) installs this on start, so daemon logs
//! show up under `cargo test -- --nocapture` without per-test setup. Tests
//! annotated with `#[test_log::test]` may install theirs first; whichever
//! runs first wins and the other is a no-op.

use tracing_subscriber::EnvFilter;

/// Default filter: the workspace crates at debug, everything else at warn.
pub const DEFAULT_TEST_FILTER: &str = "warn,brainstem_core=debug,brainstem_config=debug";

/// Install a test-writer subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_TEST_FILTER`]. Returns whether this call installed it.
pub fn init_test_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER)),
        )
        .with_test_writer()
        .try_init()
        .is_ok()
}
