//! Frame-level client for poking at the wire protocol directly.

use std::path::Path;
use std::time::Duration;

use brainstem_core::ipc::codec::{self, FrameLimits};
use brainstem_core::ipc::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// How long [`RawClient::recv`] waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A bare socket speaking length-prefixed frames. Every method panics on
/// failure, which is what a test wants.
pub struct RawClient {
    stream: UnixStream,
}

impl RawClient {
    pub async fn connect(path: impl AsRef<Path>) -> Self {
        let stream = UnixStream::connect(path.as_ref())
            .await
            .expect("failed to connect to test daemon");
        Self { stream }
    }

    pub async fn send(&mut self, request: &Request) {
        codec::write_frame(&mut self.stream, request)
            .await
            .expect("failed to send request");
    }

    /// Send any JSON value as one frame.
    pub async fn send_json(&mut self, value: serde_json::Value) {
        let body = serde_json::to_vec(&value).expect("failed to encode JSON");
        self.send_payload(&body).await;
    }

    /// Send `payload` behind a correct length header.
    pub async fn send_payload(&mut self, payload: &[u8]) {
        let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.send_raw(&frame).await;
    }

    /// Write bytes verbatim, header and all.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("failed to write raw bytes");
    }

    /// Close the sending side; the daemon sees EOF.
    pub async fn shutdown_write(&mut self) {
        self.stream
            .shutdown()
            .await
            .expect("failed to shut down write half");
    }

    /// Next frame's payload.
    pub async fn recv_payload(&mut self) -> Vec<u8> {
        tokio::time::timeout(
            RECV_TIMEOUT,
            codec::read_frame(&mut self.stream, &FrameLimits::default()),
        )
        .await
        .expect("timed out waiting for a frame")
        .expect("failed to read frame")
        .expect("daemon closed the connection")
    }

    pub async fn recv(&mut self) -> Response {
        let payload = self.recv_payload().await;
        codec::decode_payload(&payload).expect("daemon sent an undecodable response")
    }

    pub async fn recv_json(&mut self) -> serde_json::Value {
        let payload = self.recv_payload().await;
        serde_json::from_slice(&payload).expect("daemon sent invalid JSON")
    }

    pub async fn request(&mut self, request: &Request) -> Response {
        self.send(request).await;
        self.recv().await
    }

    /// Assert that nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let mut byte = [0u8; 1];
        if let Ok(read) = tokio::time::timeout(window, self.stream.read(&mut byte)).await {
            panic!("expected silence, got {read:?}");
        }
    }

    /// Assert that the daemon closes the connection, discarding anything
    /// it still flushes first.
    pub async fn expect_closed(&mut self) {
        let mut buf = [0u8; 4096];
        let closed = tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "daemon kept the connection open");
    }
}
