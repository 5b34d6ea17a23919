//! Length-prefixed text frames over any async byte stream
//!
//! Every message is a 4-byte little-endian length followed by that many bytes
//! of UTF-8.

use onionnet_common::protocol::MAX_FRAME_SIZE;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// Send one frame
pub async fn write_frame<W>(writer: &mut W, body: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = body.as_bytes();
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(bytes.len()));
    }

    // Length prefix (4 bytes, little-endian)
    let len = bytes.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;

    debug!("Sent frame ({} bytes)", bytes.len());
    Ok(())
}

/// Receive one frame. `Ok(None)` means the peer closed before a new frame
/// started.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            debug!("Stream closed before frame header");
            return Ok(None);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        error!("Frame too large: {} bytes (max {})", len, MAX_FRAME_SIZE);
        return Err(FrameError::TooLarge(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            FrameError::Truncated(len)
        } else {
            FrameError::Io(e)
        }
    })?;

    let body = String::from_utf8(data).map_err(|_| FrameError::InvalidUtf8)?;

    debug!("Received frame ({} bytes)", len);
    Ok(Some(body))
}

/// `read_frame` bounded by `limit`
pub async fn read_frame_timeout<R>(
    reader: &mut R,
    limit: Duration,
) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(limit, read_frame(reader))
        .await
        .map_err(|_| FrameError::Timeout)?
}

/// Framing errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("Connection closed mid-frame (expected {0} bytes)")]
    Truncated(usize),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Timed out waiting for frame")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
