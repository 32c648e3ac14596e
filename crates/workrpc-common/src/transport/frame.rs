//! Length-prefixed framing for byte-stream channels.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [UTF-8 JSON]`.
//!
//! The zero-length frame is reserved: a worker writes exactly one as soon as
//! it has bound its channel, and the parent treats it as the readiness
//! signal. It is never delivered to a message handler.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, WorkrpcError};

/// Default maximum frame size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Writes one frame and flushes the stream.
///
/// # Errors
///
/// Returns `FrameTooLarge` if `data` exceeds `u32::MAX` bytes, or a
/// `Transport` error if writing fails.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| WorkrpcError::FrameTooLarge {
        size: data.len(),
        max: u32::MAX as usize,
    })?;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;

    Ok(())
}

/// Writes the zero-length readiness frame.
pub async fn write_ready<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &[]).await
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary. A stream that ends inside the length prefix is an error, like
/// one that ends inside the body.
///
/// # Errors
///
/// Returns an error if:
/// - The stream ends in the middle of a frame
/// - The frame exceeds `max_size`
/// - Reading fails
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    // Only an EOF before the first prefix byte is a clean close.
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(WorkrpcError::Transport(format!(
                    "reading length prefix: stream ended mid-frame ({} of 4 bytes)",
                    filled
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io_error(e, "reading length prefix")),
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(WorkrpcError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(Some(buf))
}

/// Map IO errors to channel-level transport errors
fn map_io_error(err: std::io::Error, context: &str) -> WorkrpcError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => {
            WorkrpcError::Transport(format!("{}: channel closed", context))
        }
        _ => WorkrpcError::Transport(format!("{}: {}", context, err)),
    }
}
