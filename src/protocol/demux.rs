//! Demultiplexing loop.
//!
//! Splits a framed stream back into its stdout and stderr halves. Payloads
//! are copied straight from the reader into the destination sink through a
//! length-limited reader, so a large frame never sits in memory whole.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{read_header, truncated_payload};
use super::wire_format::Channel;
use crate::error::Result;

/// Byte counts routed to each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Frames decoded.
    pub frames: u64,
    /// Payload bytes written to stdout.
    pub stdout_bytes: u64,
    /// Payload bytes written to stderr.
    pub stderr_bytes: u64,
}

/// Route framed payloads from `reader` to `stdout` and `stderr`.
///
/// Returns when the reader reaches end-of-stream at a frame boundary. Ending
/// inside a header or payload, an unknown channel, or a payload longer than
/// `max_payload_size` is a framing error.
pub async fn demultiplex<R, O, E>(
    reader: &mut R,
    stdout: &mut O,
    stderr: &mut E,
    max_payload_size: u32,
) -> Result<DemuxStats>
where
    R: AsyncRead + Unpin + ?Sized,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = DemuxStats::default();

    while let Some(header) = read_header(reader).await? {
        header.validate(max_payload_size)?;

        let expected = u64::from(header.payload_length);
        let mut payload = (&mut *reader).take(expected);
        let copied = match header.channel {
            Channel::Stdout => tokio::io::copy(&mut payload, &mut *stdout).await?,
            Channel::Stderr => tokio::io::copy(&mut payload, &mut *stderr).await?,
        };
        if copied < expected {
            return Err(truncated_payload(header.payload_length, copied));
        }

        stats.frames += 1;
        match header.channel {
            Channel::Stdout => stats.stdout_bytes += copied,
            Channel::Stderr => stats.stderr_bytes += copied,
        }
    }

    stdout.flush().await?;
    stderr.flush().await?;
    tracing::debug!(
        "Demultiplexed {} frames ({} stdout bytes, {} stderr bytes)",
        stats.frames,
        stats.stdout_bytes,
        stats.stderr_bytes
    );
    Ok(stats)
}
