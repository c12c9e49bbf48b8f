//! # hijack-stream
//!
//! HTTP connection hijacking for exec/attach style protocols.
//!
//! A client sends an HTTP request asking for a protocol upgrade. Once the
//! server switches protocols, the connection becomes a raw duplex byte
//! stream carrying a remote process's stdin, stdout and stderr.
//!
//! ## Architecture
//!
//! - **Transport**: TCP, TLS over TCP (rustls) and Unix Domain Sockets
//! - **Handshake**: HTTP/1.1 request answered by `101` or `200`, then the
//!   connection is taken over (hyper on the server side)
//! - **Pump**: concurrent copy in both directions with half-close
//! - **Protocol**: optional 8-byte-header frames splitting stdout from stderr
//!
//! ## Example
//!
//! ```ignore
//! use hijack_stream::{hijack_http_request, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> hijack_stream::Result<()> {
//!     let options = SessionOptions::builder()
//!         .method("POST")
//!         .url("tcp://127.0.0.1:9000/exec")
//!         .payload(&serde_json::json!({"cmd": "ls"}))
//!         .multiplexed(true)
//!         .output(tokio::io::stdout())
//!         .error(tokio::io::stderr())
//!         .build();
//!
//!     hijack_http_request(options).await
//! }
//! ```

pub mod error;
pub mod handshake;
pub mod log;
pub mod options;
pub mod protocol;
pub mod pump;
pub mod transport;
pub mod writer;

pub use error::{ErrorKind, HijackError, Result};
pub use handshake::{
    connect, hijack_response, hijack_server, serve, serve_connection, HijackedRequest,
};
pub use log::{NoopLogger, SessionLogger, TracingLogger};
pub use options::{LocalStreams, PumpConfig, SessionOptions, SessionOptionsBuilder};
pub use pump::stream_data;
pub use transport::{HalfClose, HijackedStream};
pub use writer::{spawn_mux_writer, MuxHandle, MuxWriterConfig};

/// Run one client session: dial, upgrade, then pump until the remote side
/// closes.
///
/// The connection is closed when this returns, on every path.
pub async fn hijack_http_request(mut options: SessionOptions) -> Result<()> {
    let mut stream = connect(&options).await?;
    let (streams, config) = options.take_pump_parts();
    stream_data(&mut stream, streams, &config).await
}
