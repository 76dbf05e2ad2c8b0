//! Newline framing
//!
//! Every message is one `\n`-terminated line. Carriage returns are dropped
//! and a line longer than the configured cap is rejected.

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{Error, Result};

/// Line-framed read half of a connection
pub type LineReader<R> = FramedRead<R, LinesCodec>;

/// Wrap a reader so it yields one line at a time, at most `max_bytes` long
/// once carriage returns are dropped
pub fn line_reader<R: AsyncRead>(reader: R, max_bytes: usize) -> LineReader<R> {
    // One spare byte for the `\r` of a CRLF terminator
    FramedRead::new(reader, LinesCodec::new_with_max_length(max_bytes + 1))
}

fn limit_of<R>(reader: &LineReader<R>) -> usize {
    reader.decoder().max_length().saturating_sub(1)
}

/// Read the next line, waiting until one arrives
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut LineReader<R>) -> Result<String> {
    let limit = limit_of(reader);
    map_frame(reader.next().await, limit)
}

/// Take a line only if one is already available; never waits on the socket
pub fn try_read_line<R: AsyncRead + Unpin>(reader: &mut LineReader<R>) -> Option<Result<String>> {
    let limit = limit_of(reader);
    match reader.next().now_or_never() {
        // Stream ended: nothing more is coming, so nothing is buffered either
        Some(None) => None,
        Some(frame) => Some(map_frame(frame, limit)),
        None => None,
    }
}

/// Write one line and flush it
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    tracing::trace!("-> {}", line);

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn map_frame(
    frame: Option<std::result::Result<String, LinesCodecError>>,
    limit: usize,
) -> Result<String> {
    match frame {
        Some(Ok(line)) => {
            let line = if line.contains('\r') {
                line.replace('\r', "")
            } else {
                line
            };
            if line.len() > limit {
                return Err(Error::MessageTooLong { limit });
            }
            tracing::trace!("<- {}", line);
            Ok(line)
        }
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(Error::MessageTooLong { limit }),
        Some(Err(LinesCodecError::Io(e))) => Err(Error::Io(e)),
        None => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ))),
    }
}
