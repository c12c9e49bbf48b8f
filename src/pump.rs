//! Bidirectional stream pump.
//!
//! Connects a hijacked stream to local input, output and error streams:
//!
//! ```text
//!                 ┌──────── inbound ────────┐
//! stream ──read──►│ raw copy | demultiplex  ├──► output / error
//!                 └─────────────────────────┘
//!                 ┌──────── outbound ───────┐
//! input ─────────►│ copy, then half-close   ├──write──► stream
//!                 └─────────────────────────┘
//! ```
//!
//! Both directions run concurrently on the caller's task. The session ends
//! when inbound ends; an outbound direction still running at that point is
//! cancelled. Inbound errors take priority over outbound errors, and an
//! outbound error counts whenever outbound finished before inbound did.

use tokio::io::{AsyncWriteExt, BufReader};

use crate::error::{HijackError, Result};
use crate::options::{BoxedWriter, LocalStreams, PumpConfig};
use crate::protocol::demultiplex;
use crate::transport::HalfClose;

/// Pump bytes between `stream` and `streams` until the remote side closes.
///
/// Without input, the write side is half-closed immediately. A failure to
/// half-close is reported to the configured logger and never fails the
/// session. The stream stays owned by the caller, who closes it by dropping.
pub async fn stream_data<S>(
    stream: &mut S,
    streams: LocalStreams,
    config: &PumpConfig,
) -> Result<()>
where
    S: HalfClose + ?Sized,
{
    let LocalStreams {
        input,
        output,
        error,
    } = streams;
    let mut output = output.unwrap_or_else(discard);
    let mut error = error.unwrap_or_else(discard);
    let (mut reader, mut writer) = tokio::io::split(stream);

    tracing::debug!(
        "Pumping session (multiplexed: {}, input: {})",
        config.multiplexed,
        input.is_some()
    );

    let inbound = async {
        if config.multiplexed {
            demultiplex(&mut reader, &mut output, &mut error, config.max_payload_size).await?;
        } else {
            let mut buffered = BufReader::with_capacity(config.buffer_size, &mut reader);
            tokio::io::copy_buf(&mut buffered, &mut output).await?;
            output.flush().await?;
        }
        Ok::<(), HijackError>(())
    };

    let logger = config.logger.clone();
    let outbound = async move {
        let copied = match input {
            Some(mut input) => tokio::io::copy(&mut input, &mut writer).await.map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = writer.shutdown().await {
            logger.debug(format_args!("Closing the write side failed: {}", e));
        }
        copied.map_err(HijackError::from)
    };

    tokio::pin!(inbound);
    tokio::pin!(outbound);
    let mut outbound_result: Option<Result<()>> = None;

    // Outbound is polled first so a result it already has is never lost to
    // inbound finishing in the same wakeup.
    let inbound_result = loop {
        tokio::select! {
            biased;
            result = &mut outbound, if outbound_result.is_none() => {
                outbound_result = Some(result);
            }
            result = &mut inbound => break result,
        }
    };

    let result = match (inbound_result, outbound_result) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(Err(e))) => Err(e),
        (Ok(()), _) => Ok(()),
    };
    if let Err(e) = &result {
        tracing::debug!("Session ended with {} error: {}", e.kind(), e);
    }
    result
}

fn discard() -> BoxedWriter {
    Box::new(tokio::io::sink())
}
