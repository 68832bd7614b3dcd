//! A real daemon on a throwaway socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use brainstem_config::AppConfig;
use brainstem_core::ipc::IpcClient;
use brainstem_core::{Daemon, DaemonError};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TestConfigBuilder;
use crate::frames::RawClient;
use crate::tracing_setup::init_test_tracing;

/// How long [`TestDaemon`] waits for the socket to appear.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A daemon serving on a socket inside an owned temp directory.
///
/// The temp directory is deleted when this value is dropped, and the
/// daemon is shut down, guaranteeing cleanup even on panic.
pub struct TestDaemon {
    daemon: Arc<Daemon>,
    config: AppConfig,
    socket_path: PathBuf,
    task: Option<JoinHandle<Result<(), DaemonError>>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with test defaults.
    pub async fn start() -> Self {
        Self::start_with(|builder| builder).await
    }

    /// Start a daemon after adjusting the test config. The socket path is
    /// always placed in a fresh temp directory.
    pub async fn start_with(
        configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("daemon.sock");
        let config = configure(TestConfigBuilder::new())
            .socket_path(&socket_path)
            .build();

        let mut this = Self {
            daemon: Arc::new(Daemon::new(config.clone())),
            config,
            socket_path,
            task: None,
            _temp_dir: temp_dir,
        };
        this.spawn().await;
        this
    }

    async fn spawn(&mut self) {
        let daemon = Arc::clone(&self.daemon);
        self.task = Some(tokio::spawn(async move { daemon.run().await }));

        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        while !self.socket_path.exists() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "daemon did not bind {}",
                self.socket_path.display()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        debug!(path = %self.socket_path.display(), "test daemon listening");
    }

    /// Shut the daemon down and wait for it to finish.
    pub async fn stop(&mut self) {
        debug!(path = %self.socket_path.display(), "stopping test daemon");
        self.daemon.shutdown();
        if let Some(task) = self.task.take() {
            tokio::time::timeout(STARTUP_TIMEOUT, task)
                .await
                .expect("daemon did not stop")
                .expect("daemon task panicked")
                .expect("daemon returned an error");
        }
    }

    /// Start a fresh daemon (mode back at idle) on the same socket.
    pub async fn restart(&mut self) {
        self.stop().await;
        self.daemon = Arc::new(Daemon::new(self.config.clone()));
        self.spawn().await;
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// A typed client configured like this daemon.
    pub fn client(&self) -> IpcClient {
        IpcClient::from_config(&self.config)
    }

    /// A frame-level client connected to this daemon.
    pub async fn raw(&self) -> RawClient {
        RawClient::connect(&self.socket_path).await
    }

    /// Wait until the daemon has exactly `n` live connections.
    pub async fn wait_for_connections(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        while self.daemon.connection_count() != n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} connections, have {}",
                self.daemon.connection_count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.daemon.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
