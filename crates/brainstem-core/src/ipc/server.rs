//! IPC server: framed JSON over a Unix domain socket.
//!
//! The daemon binds a per-user socket and runs one reader task and one
//! writer task per accepted connection. Replies and broadcasts share the
//! connection's bounded outbound queue, so a peer that stops reading only
//! ever stalls itself. Mode changes are queued by the dispatcher and the
//! registry under the mode lock; the server never reorders them.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use brainstem_config::DaemonConfig;

use super::codec::{self, FrameError, FrameLimits};
use super::dispatch::Dispatcher;
use super::registry::{ConnectionId, Registry};
use super::types::{ERROR_FRAME_TOO_LARGE, Response};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Startup failures. These are fatal: the daemon exits and its supervisor
/// decides whether to restart it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("a daemon is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to bind {}: {source}", path.display())]
    Bind { path: PathBuf, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Deadline for a frame body once its header arrived, and for each write.
    pub io_timeout: Duration,
    pub max_frame_bytes: u32,
    /// Responses queued per connection before it counts as stalled.
    pub outbound_queue: usize,
}

impl ServerOptions {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            io_timeout: config.io_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            outbound_queue: config.outbound_queue,
        }
    }

    fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_len: self.max_frame_bytes,
            body_timeout: Some(self.io_timeout),
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

/// A bound, not yet serving, IPC listener.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    options: ServerOptions,
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
}

impl IpcServer {
    /// Bind the socket at `socket_path`.
    ///
    /// A leftover socket file nobody is accepting on is removed first. If a
    /// live daemon answers on it, binding fails with
    /// [`TransportError::AlreadyRunning`]. The socket is created with mode
    /// `0600`.
    pub fn bind(
        socket_path: impl Into<PathBuf>,
        options: ServerOptions,
        dispatcher: Dispatcher,
        registry: Arc<Registry>,
    ) -> Result<Self, TransportError> {
        let socket_path = socket_path.into();
        clear_stale_socket(&socket_path)?;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener =
            UnixListener::bind(&socket_path).map_err(|source| TransportError::Bind {
                path: socket_path.clone(),
                source,
            })?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %socket_path.display(), "IPC server listening");

        Ok(Self {
            listener,
            socket_path,
            options,
            dispatcher,
            registry,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` flips to `true` (or its sender
    /// is dropped), then tear every connection down and remove the socket.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_connection(stream),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!("IPC server shutting down");
        self.registry.clear();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e, "failed to remove socket");
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let id = self.registry.next_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.outbound_queue);
        let closed = self.registry.register(id, outbound_tx.clone());
        let (reader, writer) = stream.into_split();
        debug!(conn = %id, "connection accepted");

        tokio::spawn(write_loop(
            id,
            writer,
            outbound_rx,
            Arc::clone(&self.registry),
            self.options.io_timeout,
        ));
        tokio::spawn(read_loop(
            id,
            reader,
            outbound_tx,
            closed,
            self.dispatcher.clone(),
            Arc::clone(&self.registry),
            self.options.frame_limits(),
        ));
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn clear_stale_socket(path: &Path) -> Result<(), TransportError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !metadata.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "path exists and is not a socket"),
        });
    }

    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(TransportError::AlreadyRunning(path.to_path_buf()));
    }

    info!(path = %path.display(), "removing stale socket");
    std::fs::remove_file(path)?;
    Ok(())
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    replies: mpsc::Sender<Response>,
    mut closed: oneshot::Receiver<()>,
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
    limits: FrameLimits,
) {
    loop {
        let frame = tokio::select! {
            _ = &mut closed => {
                debug!(conn = %id, "connection closed by server");
                break;
            }
            frame = codec::read_frame(&mut reader, &limits) => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                let Some(reply) = dispatcher.handle_payload(id, &payload) else {
                    continue;
                };
                if replies.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(conn = %id, "peer disconnected");
                break;
            }
            Err(e @ FrameError::TooLarge { .. }) => {
                warn!(conn = %id, error = %e, "oversized frame, dropping connection");
                let _ = replies
                    .send(Response::error(ERROR_FRAME_TOO_LARGE, e.to_string()))
                    .await;
                break;
            }
            Err(e) => {
                warn!(conn = %id, error = %e, "read failed, dropping connection");
                break;
            }
        }
    }

    registry.remove(id);
}

/// Drains the outbound queue. Ends once the registry entry and the reader
/// have both let go of the queue, after flushing what was already queued.
async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Response>,
    registry: Arc<Registry>,
    io_timeout: Duration,
) {
    while let Some(response) = outbound.recv().await {
        match tokio::time::timeout(io_timeout, codec::write_frame(&mut writer, &response)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn = %id, error = %e, "write failed");
                break;
            }
            Err(_) => {
                warn!(conn = %id, "write timed out, dropping connection");
                break;
            }
        }
    }

    registry.remove(id);
    if let Err(e) = writer.shutdown().await {
        debug!(conn = %id, error = %e, "shutdown after last write failed");
    }
}
