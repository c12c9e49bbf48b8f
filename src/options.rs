//! Session options and local stream wiring.
//!
//! A [`SessionOptions`] value describes one exec/attach session: the HTTP
//! request that asks for the upgrade, where to dial, and the local input,
//! output and error streams the pump connects to the hijacked connection.
//!
//! # Example
//!
//! ```
//! use hijack_stream::SessionOptions;
//!
//! let options = SessionOptions::builder()
//!     .method("POST")
//!     .url("tcp://127.0.0.1:9000/exec")
//!     .payload(&serde_json::json!({"cmd": "ls"}))
//!     .multiplexed(true)
//!     .build();
//!
//! assert_eq!(options.method(), "POST");
//! assert!(options.is_multiplexed());
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use rustls::ClientConfig;
use serde::ser::Error as _;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{HijackError, Result};
use crate::log::{NoopLogger, SessionLogger};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::transport::DialConfig;

/// Default read buffer size for the raw copy direction.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Boxed local input source.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Boxed local output or error sink.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Local streams connected to a hijacked connection.
///
/// Absent sinks discard what they would have received. Absent input means
/// the write side is half-closed as soon as the pump starts.
#[derive(Default)]
pub struct LocalStreams {
    /// Bytes sent to the remote side.
    pub input: Option<BoxedReader>,
    /// Receives raw bytes, or the stdout channel when multiplexed.
    pub output: Option<BoxedWriter>,
    /// Receives the stderr channel when multiplexed.
    pub error: Option<BoxedWriter>,
}

impl LocalStreams {
    /// No input, discard all output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input source.
    pub fn input<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.input = Some(Box::new(reader));
        self
    }

    /// Set the output sink.
    pub fn output<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.output = Some(Box::new(writer));
        self
    }

    /// Set the error sink.
    pub fn error<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.error = Some(Box::new(writer));
        self
    }
}

impl fmt::Debug for LocalStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStreams")
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Stream pump configuration.
#[derive(Clone)]
pub struct PumpConfig {
    /// Demultiplex inbound bytes into stdout and stderr frames.
    pub multiplexed: bool,
    /// Read buffer size for raw copies.
    pub buffer_size: usize,
    /// Largest frame payload accepted when demultiplexing.
    pub max_payload_size: u32,
    /// Receives advisory diagnostics.
    pub logger: Arc<dyn SessionLogger>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            multiplexed: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            logger: Arc::new(NoopLogger),
        }
    }
}

impl PumpConfig {
    /// Enable or disable demultiplexing.
    pub fn multiplexed(mut self, multiplexed: bool) -> Self {
        self.multiplexed = multiplexed;
        self
    }

    /// Set the logging capability.
    pub fn logger(mut self, logger: Arc<dyn SessionLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl fmt::Debug for PumpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpConfig")
            .field("multiplexed", &self.multiplexed)
            .field("buffer_size", &self.buffer_size)
            .field("max_payload_size", &self.max_payload_size)
            .finish_non_exhaustive()
    }
}

/// Everything one client session needs.
///
/// Built with [`SessionOptions::builder`]. Checked when the session starts,
/// before any connection is made.
pub struct SessionOptions {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) host: Option<String>,
    /// Encoded body, or the encoder's message when encoding failed.
    pub(crate) payload: Option<std::result::Result<Bytes, String>>,
    pub(crate) headers: HeaderMap,
    /// First header the builder could not parse.
    pub(crate) header_error: Option<String>,
    pub(crate) upgrade_headers: bool,
    pub(crate) streams: LocalStreams,
    pub(crate) dial: DialConfig,
    pub(crate) pump: PumpConfig,
}

impl SessionOptions {
    /// Start building session options.
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }

    /// HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Target locator.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host header override.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether inbound bytes are demultiplexed.
    pub fn is_multiplexed(&self) -> bool {
        self.pump.multiplexed
    }

    /// Caller headers. Each key replaces the request's default values.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Reject options that cannot describe a session.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.method.trim().is_empty() {
            return Err(HijackError::Validation("method is required".into()));
        }
        if self.url.trim().is_empty() {
            return Err(HijackError::Validation("url is required".into()));
        }
        if let Some(message) = &self.header_error {
            return Err(HijackError::Validation(message.clone()));
        }
        Ok(())
    }

    /// Encoded request body, if any.
    pub(crate) fn body(&self) -> Result<Option<Bytes>> {
        match &self.payload {
            None => Ok(None),
            Some(Ok(bytes)) => Ok(Some(bytes.clone())),
            Some(Err(message)) => Err(HijackError::PayloadEncode(serde_json::Error::custom(
                message,
            ))),
        }
    }

    /// Take the local streams and pump configuration out of the options.
    pub(crate) fn take_pump_parts(&mut self) -> (LocalStreams, PumpConfig) {
        (std::mem::take(&mut self.streams), self.pump.clone())
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("host", &self.host)
            .field("payload", &self.payload.as_ref().map(|p| p.as_ref().map(Bytes::len)))
            .field("headers", &self.headers)
            .field("upgrade_headers", &self.upgrade_headers)
            .field("streams", &self.streams)
            .field("pump", &self.pump)
            .finish()
    }
}

/// Fluent builder for [`SessionOptions`].
pub struct SessionOptionsBuilder {
    options: SessionOptions,
}

impl Default for SessionOptionsBuilder {
    fn default() -> Self {
        Self {
            options: SessionOptions {
                method: String::new(),
                url: String::new(),
                host: None,
                payload: None,
                headers: HeaderMap::new(),
                header_error: None,
                upgrade_headers: true,
                streams: LocalStreams::default(),
                dial: DialConfig::default(),
                pump: PumpConfig::default(),
            },
        }
    }
}

impl SessionOptionsBuilder {
    /// Set the HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.options.method = method.into();
        self
    }

    /// Set the target locator, e.g. `https://host/exec` or `unix:///run/x.sock`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.options.url = url.into();
        self
    }

    /// Override the Host header.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = Some(host.into());
        self
    }

    /// JSON-encode `payload` as the request body.
    ///
    /// An encoding failure is reported when the session starts.
    pub fn payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        self.options.payload = Some(
            serde_json::to_vec(payload)
                .map(Bytes::from)
                .map_err(|e| e.to_string()),
        );
        self
    }

    /// Set a request header, replacing every earlier value for its key.
    ///
    /// A malformed name or value is reported when the session starts.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Some((name, value)) = self.parse_header(name.as_ref(), value.as_ref()) {
            self.options.headers.insert(name, value);
        }
        self
    }

    /// Add another value for a request header, keeping earlier ones.
    pub fn append_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Some((name, value)) = self.parse_header(name.as_ref(), value.as_ref()) {
            self.options.headers.append(name, value);
        }
        self
    }

    /// Merge `headers`: each key present replaces earlier values with all of
    /// its values from `headers`.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for name in headers.keys() {
            self.options.headers.remove(name);
            for value in headers.get_all(name) {
                self.options.headers.append(name.clone(), value.clone());
            }
        }
        self
    }

    fn parse_header(&mut self, name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
        let parsed = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header) => HeaderValue::from_str(value)
                .map(|value| (header, value))
                .map_err(|e| format!("invalid value for header {:?}: {}", name, e)),
            Err(e) => Err(format!("invalid header name {:?}: {}", name, e)),
        };
        match parsed {
            Ok(pair) => Some(pair),
            Err(message) => {
                self.options.header_error.get_or_insert(message);
                None
            }
        }
    }

    /// Demultiplex stdout and stderr frames instead of copying raw bytes.
    pub fn multiplexed(mut self, multiplexed: bool) -> Self {
        self.options.pump.multiplexed = multiplexed;
        self
    }

    /// Send `Connection: Upgrade` and `Upgrade: tcp` (on by default).
    pub fn upgrade_headers(mut self, enabled: bool) -> Self {
        self.options.upgrade_headers = enabled;
        self
    }

    /// Set the local input source.
    pub fn input<R>(mut self, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.options.streams.input = Some(Box::new(reader));
        self
    }

    /// Set the local output sink.
    pub fn output<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.options.streams.output = Some(Box::new(writer));
        self
    }

    /// Set the local error sink.
    pub fn error<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.options.streams.error = Some(Box::new(writer));
        self
    }

    /// Set all local streams at once.
    pub fn streams(mut self, streams: LocalStreams) -> Self {
        self.options.streams = streams;
        self
    }

    /// Set the session's logging capability.
    pub fn logger(mut self, logger: Arc<dyn SessionLogger>) -> Self {
        self.options.pump.logger = logger;
        self
    }

    /// Use the given TLS client configuration for encrypted schemes.
    pub fn tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.options.dial.tls = Some(config);
        self
    }

    /// Set the raw copy buffer size.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.options.pump.buffer_size = size.max(1);
        self
    }

    /// Set the largest accepted frame payload.
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.options.pump.max_payload_size = size;
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionOptions {
        self.options
    }
}
