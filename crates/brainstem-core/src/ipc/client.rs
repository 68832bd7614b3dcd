//! IPC client: connects to the daemon over its Unix domain socket.
//!
//! [`IpcClient`] holds where and how to connect; each call to
//! [`IpcClient::connect`] yields a [`Connection`] that can issue requests
//! and receive mode-change broadcasts on the same stream.
//!
//! The protocol carries no request identifier, so requests are strictly one
//! at a time and a reply is recognised by its shape: `Pong` answers `Ping`,
//! `Status` answers `GetStatus`, a `ModeChange` for the requested mode
//! answers `SetMode`, and an `Error` answers anything. Any other
//! `ModeChange` that shows up while a reply is awaited is a broadcast and
//! is kept for [`Connection::next_event`].
//!
//! A broadcast of the requested mode that arrives before the real reply is
//! indistinguishable from it and is taken as the reply. The real reply then
//! surfaces as a second `ModeChange` event for the same mode. Both carry the
//! same value, so a consumer tracking the latest mode is unaffected.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use brainstem_config::AppConfig;

use super::codec::{self, DEFAULT_MAX_FRAME_LEN, FrameError, FrameLimits};
use super::types::{Mode, Request, Response, StatusSnapshot};

/// Default wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames buffered between the socket reader and the connection owner.
const INBOUND_CAPACITY: usize = 16;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("daemon is not running (no listener at {})", .0.display())]
    NotRunning(PathBuf),

    #[error("failed to connect to daemon socket at {}: {source}", path.display())]
    Connect { path: PathBuf, source: io::Error },

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection closed by daemon")]
    Closed,

    #[error("timed out waiting for the daemon")]
    Timeout,

    #[error("daemon returned {code}: {message}")]
    Daemon { code: String, message: String },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Where and how to reach the daemon.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    request_timeout: Duration,
    max_frame_len: u32,
}

impl IpcClient {
    /// Create a new IPC client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Client for the socket and limits named in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            socket_path: config.daemon.socket_path(),
            request_timeout: config.client.request_timeout(),
            max_frame_len: config.daemon.max_frame_bytes,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the daemon socket exists (daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a connection.
    pub async fn connect(&self) -> Result<Connection, IpcClientError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                    IpcClientError::NotRunning(self.socket_path.clone())
                }
                _ => IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                },
            })?;
        debug!(path = %self.socket_path.display(), "connected to daemon");

        let limits = FrameLimits {
            max_len: self.max_frame_len,
            body_timeout: Some(self.request_timeout),
        };
        Ok(Connection::new(stream, limits, self.request_timeout))
    }

    // ── One-shot requests ─────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), IpcClientError> {
        self.connect().await?.ping().await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, IpcClientError> {
        self.connect().await?.status().await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<Mode, IpcClientError> {
        self.connect().await?.set_mode(mode).await
    }
}

/// One open connection to the daemon.
///
/// Dropping it stops the background reader and closes the socket.
pub struct Connection {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Result<Response, FrameError>>,
    pending: VecDeque<Mode>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl Connection {
    fn new(stream: UnixStream, limits: FrameLimits, request_timeout: Duration) -> Self {
        let (read_half, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(pump(read_half, limits, tx));
        Self {
            writer,
            inbound,
            pending: VecDeque::new(),
            reader,
            request_timeout,
        }
    }

    /// Send `request` and wait for its reply.
    ///
    /// An `Error` reply becomes [`IpcClientError::Daemon`]. Not cancel-safe:
    /// dropping the future mid-request may leave the reply to be misread as
    /// a broadcast later.
    pub async fn request(&mut self, request: &Request) -> Result<Response, IpcClientError> {
        tokio::time::timeout(
            self.request_timeout,
            codec::write_frame(&mut self.writer, request),
        )
        .await
        .map_err(|_| IpcClientError::Timeout)??;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let response = tokio::time::timeout_at(deadline, self.inbound.recv())
                .await
                .map_err(|_| IpcClientError::Timeout)?
                .ok_or(IpcClientError::Closed)??;

            if answers(request, &response) {
                return match response {
                    Response::Error { code, message } => {
                        Err(IpcClientError::Daemon { code, message })
                    }
                    other => Ok(other),
                };
            }

            match response {
                Response::ModeChange { mode, .. } => self.pending.push_back(mode),
                other => warn!(kind = other.kind(), "ignoring unsolicited response"),
            }
        }
    }

    pub async fn ping(&mut self) -> Result<(), IpcClientError> {
        match self.request(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot, IpcClientError> {
        match self.request(&Request::GetStatus).await? {
            Response::Status(snapshot) => Ok(snapshot),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the daemon to switch modes; returns the acknowledged mode.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<Mode, IpcClientError> {
        match self.request(&Request::SetMode { mode }).await? {
            Response::ModeChange { mode, .. } => Ok(mode),
            other => Err(unexpected(&other)),
        }
    }

    /// Wait for the next mode-change broadcast.
    ///
    /// Cancel-safe: can be raced in `select!` without losing events.
    /// Malformed frames are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Mode, IpcClientError> {
        if let Some(mode) = self.pending.pop_front() {
            return Ok(mode);
        }
        loop {
            match self.inbound.recv().await {
                None => return Err(IpcClientError::Closed),
                Some(Ok(Response::ModeChange { mode, .. })) => return Ok(mode),
                Some(Ok(other)) => debug!(kind = other.kind(), "ignoring stray response"),
                Some(Err(FrameError::Malformed(detail))) => {
                    warn!(%detail, "skipping malformed frame from daemon");
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Whether `response` is the reply to `request` rather than a broadcast.
fn answers(request: &Request, response: &Response) -> bool {
    match (request, response) {
        (_, Response::Error { .. }) => true,
        (Request::Ping, Response::Pong) => true,
        (Request::GetStatus, Response::Status(_)) => true,
        (Request::SetMode { mode: asked }, Response::ModeChange { mode, .. }) => asked == mode,
        _ => false,
    }
}

fn unexpected(response: &Response) -> IpcClientError {
    IpcClientError::UnexpectedReply(response.kind().to_string())
}

/// Forward decoded frames until the stream ends or fails. A body that does
/// not parse is forwarded as an error without ending the stream.
async fn pump(
    mut reader: OwnedReadHalf,
    limits: FrameLimits,
    tx: mpsc::Sender<Result<Response, FrameError>>,
) {
    loop {
        let item = match codec::read_frame(&mut reader, &limits).await {
            Ok(Some(payload)) => codec::decode_payload(&payload),
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        };
        if tx.send(item).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    /// Accept one connection and hand it to `script`.
    fn fake_daemon<F, Fut>(script: F) -> (TempDir, IpcClient)
    where
        F: FnOnce(UnixStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            script(stream).await;
        });
        (dir, IpcClient::new(path).with_timeout(Duration::from_millis(500)))
    }

    async fn expect_request(stream: &mut UnixStream) -> Request {
        codec::decode_stream(stream, &FrameLimits::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_reply_shapes() {
        let set = Request::SetMode { mode: Mode::Agent };
        assert!(answers(&Request::Ping, &Response::Pong));
        assert!(answers(&set, &Response::mode_change(Mode::Agent)));
        assert!(!answers(&set, &Response::mode_change(Mode::Idle)));
        assert!(!answers(&Request::Ping, &Response::mode_change(Mode::Idle)));
        assert!(answers(&Request::GetStatus, &Response::error("x", "y")));
    }

    #[tokio::test]
    async fn test_not_running_error() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("missing.sock"));
        assert!(!client.daemon_available());
        assert!(matches!(
            client.ping().await,
            Err(IpcClientError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_before_reply_is_queued_as_event() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            assert_eq!(expect_request(&mut stream).await, Request::Ping);
            codec::write_frame(&mut stream, &Response::mode_change(Mode::Agent))
                .await
                .unwrap();
            codec::write_frame(&mut stream, &Response::Pong).await.unwrap();
            codec::write_frame(&mut stream, &Response::mode_change(Mode::Idle))
                .await
                .unwrap();
        });

        let mut conn = client.connect().await.unwrap();
        conn.ping().await.unwrap();
        assert_eq!(conn.next_event().await.unwrap(), Mode::Agent);
        assert_eq!(conn.next_event().await.unwrap(), Mode::Idle);
    }

    #[tokio::test]
    async fn test_set_mode_skips_other_mode_changes() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            let request = expect_request(&mut stream).await;
            assert_eq!(request, Request::SetMode { mode: Mode::Dictation });
            codec::write_frame(&mut stream, &Response::mode_change(Mode::Intelligent))
                .await
                .unwrap();
            codec::write_frame(&mut stream, &Response::mode_change(Mode::Dictation))
                .await
                .unwrap();
        });

        let mut conn = client.connect().await.unwrap();
        assert_eq!(conn.set_mode(Mode::Dictation).await.unwrap(), Mode::Dictation);
        assert_eq!(conn.next_event().await.unwrap(), Mode::Intelligent);
    }

    #[tokio::test]
    async fn test_same_mode_broadcast_is_taken_as_reply() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            expect_request(&mut stream).await;
            // Another client's change to the same mode, then our acknowledgment.
            for _ in 0..2 {
                codec::write_frame(&mut stream, &Response::mode_change(Mode::Agent))
                    .await
                    .unwrap();
            }
        });

        let mut conn = client.connect().await.unwrap();
        assert_eq!(conn.set_mode(Mode::Agent).await.unwrap(), Mode::Agent);
        assert_eq!(conn.next_event().await.unwrap(), Mode::Agent);
        assert!(matches!(
            conn.next_event().await,
            Err(IpcClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_error_reply_maps_to_daemon_error() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            expect_request(&mut stream).await;
            codec::write_frame(&mut stream, &Response::error("bad_request", "nope"))
                .await
                .unwrap();
        });

        match client.status().await {
            Err(IpcClientError::Daemon { code, message }) => {
                assert_eq!(code, "bad_request");
                assert_eq!(message, "nope");
            }
            other => panic!("expected daemon error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            expect_request(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client = client.with_timeout(Duration::from_millis(50));
        assert!(matches!(client.ping().await, Err(IpcClientError::Timeout)));
    }

    #[tokio::test]
    async fn test_daemon_hangup_is_closed() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            expect_request(&mut stream).await;
            drop(stream);
        });
        assert!(matches!(client.ping().await, Err(IpcClientError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let (_dir, client) = fake_daemon(|mut stream| async move {
            let garbage = b"{\"type\":\"fireworks\"}";
            let mut frame = (garbage.len() as u32).to_le_bytes().to_vec();
            frame.extend_from_slice(garbage);
            stream.write_all(&frame).await.unwrap();
            codec::write_frame(&mut stream, &Response::mode_change(Mode::Agent))
                .await
                .unwrap();
        });

        let mut conn = client.connect().await.unwrap();
        assert_eq!(conn.next_event().await.unwrap(), Mode::Agent);
        assert!(matches!(
            conn.next_event().await,
            Err(IpcClientError::Closed)
        ));
    }
}
