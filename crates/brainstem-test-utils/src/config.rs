//! Configuration builders for tests.

use std::path::Path;

use brainstem_config::{AppConfig, BackoffKind};

/// Fluent builder for [`AppConfig`] in tests.
///
/// Defaults are tightened for tests: one-second I/O timeouts and a short
/// fixed retry delay.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(dir.path().join("daemon.sock"))
///     .outbound_queue(2)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.io_timeout_ms = 1_000;
        config.client.retry_delay_ms = 50;
        config.client.request_timeout_ms = 1_000;
        Self { config }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.socket_path = Some(path.as_ref().display().to_string());
        self
    }

    pub fn io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.daemon.io_timeout_ms = ms;
        self
    }

    pub fn max_frame_bytes(mut self, bytes: u32) -> Self {
        self.config.daemon.max_frame_bytes = bytes;
        self
    }

    pub fn outbound_queue(mut self, len: usize) -> Self {
        self.config.daemon.outbound_queue = len;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.client.retry_delay_ms = ms;
        if self.config.client.max_retry_delay_ms < ms {
            self.config.client.max_retry_delay_ms = ms;
        }
        self
    }

    pub fn backoff(mut self, backoff: BackoffKind) -> Self {
        self.config.client.backoff = backoff;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.request_timeout_ms = ms;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    /// The finished config. Panics if it would fail validation.
    pub fn build(self) -> AppConfig {
        self.config
            .validate()
            .expect("test config failed validation");
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
