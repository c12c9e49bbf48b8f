//! Multiplexing writer task.
//!
//! Serializes stdout and stderr frames from any number of producers onto one
//! raw stream. Producers hold a cloneable [`MuxHandle`]; a dedicated task
//! owns the write side and batches whatever is queued into vectored writes.
//!
//! # Architecture
//!
//! ```text
//! stdout producer ─┐
//!                  ├─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! stderr producer ─┘
//! ```
//!
//! When every handle is dropped the task flushes, half-closes the stream and
//! exits, so the reading side sees a clean end-of-stream at a frame boundary.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{HijackError, Result};
use crate::protocol::{Channel, FrameHeader, DEFAULT_MAX_FRAME_PAYLOAD, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    /// Pre-encoded header.
    pub(crate) header: [u8; HEADER_SIZE],
    /// Payload bytes.
    pub(crate) payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    ///
    /// Only built from chunks no longer than the clamped
    /// `max_frame_payload`, so the length always fits the header.
    #[inline]
    pub(crate) fn new(channel: Channel, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= u32::MAX as usize);
        Self {
            header: FrameHeader::new(channel, payload.len() as u32).encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub(crate) fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the multiplexing writer.
#[derive(Debug, Clone)]
pub struct MuxWriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Largest payload carried by one frame. Longer writes are chunked.
    pub max_frame_payload: usize,
}

impl Default for MuxWriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
        }
    }
}

impl MuxWriterConfig {
    /// Set the frame queue capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the largest payload carried by one frame.
    pub fn max_frame_payload(mut self, size: usize) -> Self {
        self.max_frame_payload = size.clamp(1, u32::MAX as usize);
        self
    }
}

/// Handle for queuing output to the writer task.
///
/// Cheaply cloneable; hand one to each producer.
#[derive(Debug, Clone)]
pub struct MuxHandle {
    tx: mpsc::Sender<OutboundFrame>,
    max_frame_payload: usize,
}

impl MuxHandle {
    /// Queue `data` on `channel`, split into frames of at most the configured
    /// payload size.
    ///
    /// Empty data queues nothing. Fails once the writer task has stopped.
    pub async fn send(&self, channel: Channel, data: impl Into<Bytes>) -> Result<()> {
        let mut data = data.into();
        while !data.is_empty() {
            let chunk = data.split_to(data.len().min(self.max_frame_payload));
            self.tx
                .send(OutboundFrame::new(channel, chunk))
                .await
                .map_err(|_| writer_stopped())?;
        }
        Ok(())
    }

    /// Queue `data` on the stdout channel.
    pub async fn stdout(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Channel::Stdout, data).await
    }

    /// Queue `data` on the stderr channel.
    pub async fn stderr(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Channel::Stderr, data).await
    }

    /// Whether the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn writer_stopped() -> HijackError {
    HijackError::Stream(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "multiplexing writer has stopped",
    ))
}

/// Spawn the writer task and return a handle for queuing output.
///
/// The `JoinHandle` resolves once every handle is dropped and the stream has
/// been flushed and half-closed, or with the first write error.
pub fn spawn_mux_writer<W>(
    writer: W,
    config: MuxWriterConfig,
) -> (MuxHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let handle = MuxHandle {
        tx,
        max_frame_payload: config.max_frame_payload.clamp(1, u32::MAX as usize),
    };

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer).await;
        if let Err(e) = &result {
            tracing::warn!("Multiplexing writer stopped: {}", e);
        }
        result
    });

    (handle, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frames = 0u64;

    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        frames += batch.len() as u64;
        write_batch(&mut writer, &batch).await?;
    }

    writer.shutdown().await?;
    tracing::debug!("Multiplexing writer finished after {} frames", frames);
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(HijackError::Stream(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            slices.push(IoSlice::new(&frame.header[skip_bytes.saturating_sub(offset)..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                slices.push(IoSlice::new(&frame.payload[skip_bytes.saturating_sub(offset)..]));
            }
            offset = payload_end;
        }
    }

    slices
}
