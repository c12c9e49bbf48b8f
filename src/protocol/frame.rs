//! Frame struct and single-frame encode/decode helpers.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use hijack_stream::protocol::{build_frame, Channel, HEADER_SIZE};
//!
//! let bytes = build_frame(Channel::Stdout, b"hello");
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{Channel, FrameHeader, HEADER_SIZE};
use crate::error::{HijackError, Result};

/// A complete, buffered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination channel.
    pub channel: Channel,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: Channel, payload: Bytes) -> Self {
        Self { channel, payload }
    }

    /// Header describing this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.channel, payload_len(&self.payload))
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_frame(self.channel, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Panics
///
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn build_frame(channel: Channel, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(channel, payload_len(payload));
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame, header and payload gathered into as few writes as possible.
///
/// Does not flush.
pub async fn write_frame<W>(writer: &mut W, channel: Channel, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        HijackError::Framing(format!("Payload of {} bytes does not fit a frame", payload.len()))
    })?;
    let header = FrameHeader::new(channel, len).encode();
    let total = HEADER_SIZE + payload.len();

    let mut written = 0;
    while written < total {
        let n = if written < HEADER_SIZE {
            let slices = [IoSlice::new(&header[written..]), IoSlice::new(payload)];
            writer.write_vectored(&slices).await?
        } else {
            writer.write(&payload[written - HEADER_SIZE..]).await?
        };
        if n == 0 {
            return Err(HijackError::Stream(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write frame",
            )));
        }
        written += n;
    }
    Ok(())
}

/// Read one complete frame into memory.
///
/// Returns `Ok(None)` on end-of-stream at a frame boundary. Use
/// [`demultiplex`](super::demultiplex) for large payloads: it streams instead.
pub async fn read_frame<R>(reader: &mut R, max_payload_size: u32) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = match read_header(reader).await? {
        Some(header) => header,
        None => return Ok(None),
    };
    header.validate(max_payload_size)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    let mut filled = 0;
    while filled < payload.len() {
        let n = reader.read(&mut payload[filled..]).await?;
        if n == 0 {
            return Err(truncated_payload(header.payload_length, filled as u64));
        }
        filled += n;
    }

    Ok(Some(Frame::new(header.channel, Bytes::from(payload))))
}

/// Read and decode the next header.
///
/// `Ok(None)` means the stream ended cleanly before the first header byte.
/// Ending anywhere inside the header is a framing error.
pub(crate) async fn read_header<R>(reader: &mut R) -> Result<Option<FrameHeader>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(HijackError::Framing(format!(
                "Stream ended inside frame header after {} of {} bytes",
                filled, HEADER_SIZE
            )));
        }
        filled += n;
    }
    FrameHeader::decode(&buf).map(Some)
}

pub(crate) fn truncated_payload(expected: u32, got: u64) -> HijackError {
    HijackError::Framing(format!(
        "Stream ended inside frame payload after {} of {} bytes",
        got, expected
    ))
}

fn payload_len(payload: &[u8]) -> u32 {
    u32::try_from(payload.len()).expect("frame payload exceeds u32::MAX bytes")
}
