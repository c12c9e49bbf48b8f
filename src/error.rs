//! Error types for hijack-stream.

use std::fmt;

use thiserror::Error;

use crate::transport::Family;

/// Coarse classification of a [`HijackError`].
///
/// Validation, payload, transport and handshake errors are raised before any
/// byte is pumped. Framing and stream errors come out of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed session options.
    Validation,
    /// The request payload could not be JSON-encoded.
    PayloadEncode,
    /// Resolving or dialing the target failed.
    Transport,
    /// The HTTP exchange or the hijack itself failed.
    Handshake,
    /// A multiplexed frame was malformed or truncated.
    Framing,
    /// A read or write failed mid-session.
    Stream,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::PayloadEncode => "payload encode",
            ErrorKind::Transport => "transport",
            ErrorKind::Handshake => "handshake",
            ErrorKind::Framing => "framing",
            ErrorKind::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Main error type for all hijack-stream operations.
#[derive(Debug, Error)]
pub enum HijackError {
    /// Session options are incomplete or malformed.
    #[error("Invalid session options: {0}")]
    Validation(String),

    /// JSON serialization of the request payload failed.
    #[error("Payload encode error: {0}")]
    PayloadEncode(#[source] serde_json::Error),

    /// Dialing the target failed.
    #[error("Transport error dialing {family} {address}: {source}")]
    Transport {
        /// Protocol family that was dialed.
        family: Family,
        /// Address that was dialed.
        address: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server connection failed before it could be taken over.
    #[error("Handshake error: {0}")]
    Http(#[from] hyper::Error),

    /// Sending the request or reading the response head failed.
    #[error("Handshake error: HTTP exchange failed: {0}")]
    Exchange(#[source] std::io::Error),

    /// The server answered without switching protocols.
    #[error("Handshake error: server answered {0} instead of switching protocols")]
    UpgradeRefused(http::StatusCode),

    /// The connection could not be converted to raw mode.
    #[error("Handshake error: {0}")]
    Hijack(String),

    /// Malformed or truncated multiplexed frame.
    #[error("Framing error: {0}")]
    Framing(String),

    /// I/O failure while streaming.
    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),
}

impl HijackError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HijackError::Validation(_) => ErrorKind::Validation,
            HijackError::PayloadEncode(_) => ErrorKind::PayloadEncode,
            HijackError::Transport { .. } => ErrorKind::Transport,
            HijackError::Http(_)
            | HijackError::Exchange(_)
            | HijackError::UpgradeRefused(_)
            | HijackError::Hijack(_) => ErrorKind::Handshake,
            HijackError::Framing(_) => ErrorKind::Framing,
            HijackError::Stream(_) => ErrorKind::Stream,
        }
    }

    pub(crate) fn transport(
        family: Family,
        address: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        HijackError::Transport {
            family,
            address: address.into(),
            source,
        }
    }
}

/// Result type alias using HijackError.
pub type Result<T> = std::result::Result<T, HijackError>;
