//! Client-side reconnection controller.
//!
//! Keeps one connection to the daemon alive for the lifetime of a client
//! process. The loop is explicit: connect, resynchronise with `GetStatus`,
//! report `Connected`, relay broadcasts until the link fails, report
//! `Disconnected`, sleep, repeat. There is no attempt limit.
//!
//! ```text
//!   ┌──────────────┐  connect + GetStatus ok  ┌───────────┐
//!   │  Connecting  │─────────────────────────▶│ Connected │
//!   └──────▲───┬───┘                          └─────┬─────┘
//!          │   │ failed                             │ lost
//!   delay  │   ▼                                    ▼
//!   ┌──────┴─────────────────────────────────────────────┐
//!   │                   Disconnected                      │
//!   └─────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use brainstem_config::{BackoffKind, ClientConfig};

use crate::ipc::client::{Connection, IpcClient, IpcClientError};
use crate::ipc::types::{Mode, StatusSnapshot};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Delay before each reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The same delay every time.
    Fixed(Duration),
    /// `base`, then doubling after each consecutive failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 for the first retry after a
    /// loss or failure).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { base, max } => base
                .checked_mul(1u32 << attempt.min(31))
                .map_or(max, |delay| delay.min(max)),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        match config.backoff {
            BackoffKind::Fixed => RetryPolicy::Fixed(config.retry_delay()),
            BackoffKind::Exponential => RetryPolicy::Exponential {
                base: config.retry_delay(),
                max: config.max_retry_delay(),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(Duration::from_secs(5))
    }
}

/// Connectivity as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        })
    }
}

/// Reported to the rendering layer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Link(LinkState),
    /// Fresh daemon state after (re)connecting; precedes `Link(Connected)`.
    Synced(StatusSnapshot),
    ModeChanged(Mode),
}

#[derive(Debug)]
enum ClientCommand {
    SetMode(Mode),
    Shutdown,
}

/// Errors from [`ControllerHandle`].
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error("reconnect controller has stopped")]
    Stopped,
}

/// Handle for interacting with a running [`ReconnectController`].
///
/// Dropping the handle stops the controller.
pub struct ControllerHandle {
    state: watch::Receiver<LinkState>,
    events: mpsc::Receiver<ClientEvent>,
    commands: mpsc::Sender<ClientCommand>,
}

impl ControllerHandle {
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Next event, or `None` once the controller has stopped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Request a mode change. Dropped with a warning while disconnected.
    pub async fn set_mode(&self, mode: Mode) -> Result<(), ReconnectError> {
        self.commands
            .send(ClientCommand::SetMode(mode))
            .await
            .map_err(|_| ReconnectError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), ReconnectError> {
        self.commands
            .send(ClientCommand::Shutdown)
            .await
            .map_err(|_| ReconnectError::Stopped)
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Lost(IpcClientError),
    Shutdown,
}

/// Keeps a client connected to the daemon.
pub struct ReconnectController {
    client: IpcClient,
    policy: RetryPolicy,
    state: watch::Sender<LinkState>,
    events: mpsc::Sender<ClientEvent>,
    commands: mpsc::Receiver<ClientCommand>,
}

impl ReconnectController {
    /// Create a controller and the handle used to drive it.
    pub fn new(client: IpcClient, policy: RetryPolicy) -> (Self, ControllerHandle) {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let controller = Self {
            client,
            policy,
            state: state_tx,
            events: event_tx,
            commands: command_rx,
        };
        let handle = ControllerHandle {
            state: state_rx,
            events: event_rx,
            commands: command_tx,
        };
        (controller, handle)
    }

    /// Run until shutdown is requested or the handle is dropped.
    pub async fn run(mut self) {
        info!(path = %self.client.socket_path().display(), "reconnect controller started");
        let mut attempt: u32 = 0;

        loop {
            self.set_link(LinkState::Connecting);

            let established = tokio::select! {
                result = establish(&self.client) => Some(result),
                command = self.commands.recv() => match command {
                    Some(ClientCommand::SetMode(mode)) => {
                        warn!(%mode, "not connected, dropping mode request");
                        None
                    }
                    Some(ClientCommand::Shutdown) | None => break,
                },
            };

            match established {
                Some(Ok((conn, snapshot))) => {
                    attempt = 0;
                    self.emit(ClientEvent::Synced(snapshot));
                    self.set_link(LinkState::Connected);
                    match self.session(conn).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => warn!(error = %e, "connection to daemon lost"),
                    }
                }
                Some(Err(e)) => warn!(error = %e, attempt, "connection attempt failed"),
                None => {}
            }

            self.set_link(LinkState::Disconnected);
            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            if !self.wait(delay).await {
                break;
            }
        }

        self.set_link(LinkState::Disconnected);
        info!("reconnect controller stopped");
    }

    /// Relay broadcasts and commands until the connection fails.
    async fn session(&mut self, mut conn: Connection) -> SessionEnd {
        loop {
            tokio::select! {
                event = conn.next_event() => match event {
                    Ok(mode) => self.emit(ClientEvent::ModeChanged(mode)),
                    Err(e) => return SessionEnd::Lost(e),
                },
                command = self.commands.recv() => match command {
                    Some(ClientCommand::SetMode(mode)) => match conn.set_mode(mode).await {
                        Ok(mode) => self.emit(ClientEvent::ModeChanged(mode)),
                        Err(IpcClientError::Daemon { code, message }) => {
                            warn!(%mode, %code, %message, "daemon rejected mode request");
                        }
                        Err(e) => return SessionEnd::Lost(e),
                    },
                    Some(ClientCommand::Shutdown) | None => return SessionEnd::Shutdown,
                },
            }
        }
    }

    /// Sleep for `delay` while still answering commands. Returns `false`
    /// when the controller should stop.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(ClientCommand::SetMode(mode)) => {
                        warn!(%mode, "not connected, dropping mode request");
                    }
                    Some(ClientCommand::Shutdown) | None => return false,
                },
            }
        }
    }

    fn set_link(&self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "link state");
            self.emit(ClientEvent::Link(next));
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!(?event, "event queue full, dropping event");
        }
    }
}

/// Connect and fetch the daemon's current state.
async fn establish(client: &IpcClient) -> Result<(Connection, StatusSnapshot), IpcClientError> {
    let mut conn = client.connect().await?;
    let snapshot = conn.status().await?;
    Ok((conn, snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fixed_policy_never_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1_000), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_policy_doubles_up_to_cap() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = ClientConfig::default();
        assert_eq!(
            RetryPolicy::from_config(&config),
            RetryPolicy::Fixed(Duration::from_secs(5))
        );

        config.backoff = BackoffKind::Exponential;
        config.retry_delay_ms = 250;
        config.max_retry_delay_ms = 4_000;
        assert_eq!(
            RetryPolicy::from_config(&config),
            RetryPolicy::Exponential {
                base: Duration::from_millis(250),
                max: Duration::from_secs(4),
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_daemon_cycles_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("nobody.sock"));
        let (controller, mut handle) =
            ReconnectController::new(client, RetryPolicy::Fixed(Duration::from_millis(10)));
        assert_eq!(handle.state(), LinkState::Disconnected);
        let task = tokio::spawn(controller.run());

        // Two full failed cycles.
        for _ in 0..2 {
            assert_eq!(
                handle.next_event().await,
                Some(ClientEvent::Link(LinkState::Connecting))
            );
            assert_eq!(
                handle.next_event().await,
                Some(ClientEvent::Link(LinkState::Disconnected))
            );
        }

        handle.set_mode(Mode::Agent).await.unwrap();
        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_controller() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("nobody.sock"));
        let (controller, handle) =
            ReconnectController::new(client, RetryPolicy::Fixed(Duration::from_secs(60)));
        let task = tokio::spawn(controller.run());
        drop(handle);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_stop_reports_stopped() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("nobody.sock"));
        let (controller, handle) = ReconnectController::new(client, RetryPolicy::default());
        drop(controller);
        assert!(matches!(
            handle.shutdown().await,
            Err(ReconnectError::Stopped)
        ));
    }
}
