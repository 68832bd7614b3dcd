//! Daemon runtime: bind, serve, and shut down on request or signal.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use brainstem_config::AppConfig;

use crate::build_info;
use crate::hotkey::{self, HotkeyEvent};
use crate::ipc::dispatch::Dispatcher;
use crate::ipc::registry::Registry;
use crate::ipc::server::{IpcServer, ServerOptions, TransportError};
use crate::ipc::types::StatusSnapshot;
use crate::mode::ModeController;
use crate::status::{HotkeyFlag, StatusProvider};

/// Hotkey events buffered before the key-event source is slowed down.
const HOTKEY_CAPACITY: usize = 64;

/// The brainstem daemon.
pub struct Daemon {
    config: AppConfig,
    shutdown_tx: watch::Sender<bool>,
    modes: Arc<ModeController>,
    registry: Arc<Registry>,
    status: StatusProvider,
    hotkey_flag: HotkeyFlag,
    hotkey_tx: mpsc::Sender<HotkeyEvent>,
    hotkey_rx: Mutex<Option<mpsc::Receiver<HotkeyEvent>>>,
}

impl Daemon {
    /// Create a new daemon instance. Mode starts at idle; uptime counts
    /// from here.
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (hotkey_tx, hotkey_rx) = mpsc::channel(HOTKEY_CAPACITY);
        let modes = Arc::new(ModeController::new());
        let hotkey_flag = HotkeyFlag::new();
        let status = StatusProvider::new(Arc::clone(&modes), hotkey_flag.clone());

        Self {
            config,
            shutdown_tx,
            modes,
            registry: Arc::new(Registry::new()),
            status,
            hotkey_flag,
            hotkey_tx,
            hotkey_rx: Mutex::new(Some(hotkey_rx)),
        }
    }

    /// Bind the socket and serve until [`Daemon::shutdown`], SIGINT or
    /// SIGTERM.
    ///
    /// Bind failures are returned immediately and are not retried.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let socket_path = self.config.daemon.socket_path();
        info!(
            path = %socket_path.display(),
            version = %build_info::version_string(),
            "brainstem daemon starting"
        );

        let server = IpcServer::bind(
            &socket_path,
            ServerOptions::from_config(&self.config.daemon),
            Dispatcher::new(
                Arc::clone(&self.modes),
                self.status.clone(),
                Arc::clone(&self.registry),
            ),
            Arc::clone(&self.registry),
        )?;

        let hotkey_task = match self.take_hotkey_events() {
            Some(events) => Some(tokio::spawn(hotkey::run(
                events,
                Arc::clone(&self.modes),
                self.hotkey_flag.clone(),
            ))),
            None => {
                warn!("hotkey events already consumed by an earlier run");
                None
            }
        };

        let serve = server.serve(self.shutdown_tx.subscribe());
        tokio::pin!(serve);

        let result = tokio::select! {
            result = &mut serve => result,
            _ = termination_signal() => {
                warn!("termination signal received, initiating graceful shutdown");
                self.shutdown();
                serve.await
            }
        };

        if let Some(task) = hotkey_task {
            task.abort();
        }
        result?;
        info!("daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the daemon. Takes effect even if
    /// `run` has not started yet.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get a reference to the daemon's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The mode state machine, for in-process feature modules.
    pub fn modes(&self) -> Arc<ModeController> {
        Arc::clone(&self.modes)
    }

    /// Where the platform key-event source reports modifier changes.
    pub fn hotkey_sender(&self) -> mpsc::Sender<HotkeyEvent> {
        self.hotkey_tx.clone()
    }

    pub fn hotkey_flag(&self) -> HotkeyFlag {
        self.hotkey_flag.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    fn take_hotkey_events(&self) -> Option<mpsc::Receiver<HotkeyEvent>> {
        self.hotkey_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn termination_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
        _ = terminate => {}
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
