//! Length-prefixed framing.
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┐
//! │ len: u32 (LE, 4 B) │ payload: len bytes JSON  │
//! └────────────────────┴──────────────────────────┘
//! ```
//!
//! A receiver never looks at payload bytes until all `len` of them have
//! arrived. A stream that ends inside a header or body is [`FrameError::Truncated`];
//! a stream that ends exactly on a frame boundary is a clean close.

use std::io;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Default payload cap (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Errors from encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream ended before the frame was complete")]
    Truncated,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u32, max: u32 },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("timed out waiting for the frame body")]
    TimedOut,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Bounds applied while reading frames from a peer.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Largest accepted payload.
    pub max_len: u32,
    /// Deadline for the body once its header has arrived. The header
    /// itself is awaited without a deadline: an idle peer is not an error.
    pub body_timeout: Option<Duration>,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_FRAME_LEN,
            body_timeout: None,
        }
    }
}

/// Serialize `message` and prepend its little-endian length.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a complete payload into one of the expected message shapes.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(payload).map_err(|e| FrameError::Malformed(e.to_string()))
}

/// Decode the first frame held in `buf`.
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, FrameError> {
    let Some((header, rest)) = buf.split_first_chunk::<HEADER_LEN>() else {
        return Err(FrameError::Truncated);
    };
    let len = u32::from_le_bytes(*header);
    if len > DEFAULT_MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: DEFAULT_MAX_FRAME_LEN,
        });
    }
    let payload = rest.get(..len as usize).ok_or(FrameError::Truncated)?;
    decode_payload(payload)
}

/// Read one frame's payload.
///
/// Returns `Ok(None)` when the peer closed the stream before sending any
/// byte of a new header.
pub async fn read_frame<R>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_le_bytes(header);
    if len > limits.max_len {
        return Err(FrameError::TooLarge {
            len,
            max: limits.max_len,
        });
    }

    let mut body = vec![0u8; len as usize];
    let read_body = reader.read_exact(&mut body);
    let result = match limits.body_timeout {
        Some(deadline) => tokio::time::timeout(deadline, read_body)
            .await
            .map_err(|_| FrameError::TimedOut)?,
        None => read_body.await,
    };

    match result {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(e) => Err(e.into()),
    }
}

/// Read exactly one message: the header, then its body.
///
/// Unlike [`read_frame`], a stream that is already at EOF counts as
/// [`FrameError::Truncated`], since a message was expected.
pub async fn decode_stream<T, R>(reader: &mut R, limits: &FrameLimits) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, limits)
        .await?
        .ok_or(FrameError::Truncated)?;
    decode_payload(&payload)
}

/// Encode `message` and write the whole frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
