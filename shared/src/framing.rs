//! Length-framed bincode codec for supervisor ↔ worker TCP streams
//!
//! Every message on the wire is a 4-byte little-endian length prefix followed
//! by the bincode-encoded payload. Both sides of the connection use these
//! helpers so the framing rules live in exactly one place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

/// Upper bound on a single framed message (1MB)
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Serialize a message and write it with a length prefix
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let serialized = bincode::serialize(message).map_err(|e| SharedError::SerializationError {
        message: format!("Failed to serialize frame: {e}"),
    })?;

    if serialized.len() > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge {
            size: serialized.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let len = serialized.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| SharedError::FrameIo {
            message: format!("Failed to write frame length: {e}"),
        })?;
    writer
        .write_all(&serialized)
        .await
        .map_err(|e| SharedError::FrameIo {
            message: format!("Failed to write frame body: {e}"),
        })?;

    Ok(())
}

/// Read one framed message, returning `Ok(None)` on a clean EOF
///
/// A connection closed before any length bytes arrive is a normal end of
/// stream. EOF in the middle of a frame is reported as an error.
pub async fn read_frame<R, T>(reader: &mut R) -> SharedResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(SharedError::FrameIo {
                message: format!("Failed to read frame length: {e}"),
            });
        }
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge {
            size: msg_len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut msg_buf = vec![0u8; msg_len];
    reader
        .read_exact(&mut msg_buf)
        .await
        .map_err(|e| SharedError::FrameIo {
            message: format!("Failed to read frame body: {e}"),
        })?;

    let message = bincode::deserialize::<T>(&msg_buf).map_err(|e| SharedError::DeserializationError {
        message: format!("Failed to deserialize frame: {e}"),
    })?;

    Ok(Some(message))
}
