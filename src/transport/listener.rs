//! Server-side listener for TCP and Unix Domain Socket locators.
//!
//! # Example
//!
//! ```ignore
//! use hijack_stream::transport::{Listener, Locator};
//!
//! let listener = Listener::bind(&Locator::parse("unix:///tmp/exec.sock")?).await?;
//! let stream = listener.accept().await?;
//! ```

#[cfg(unix)]
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tokio::net::TcpListener;

use super::dial::NetStream;
use super::locator::{Family, Locator};
use crate::error::{HijackError, Result};

/// Characters escaped when a socket path is written back into a locator.
#[cfg(unix)]
const SOCKET_PATH: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'?');

/// A bound listener accepting [`NetStream`] connections.
///
/// TLS termination is left to the caller.
#[derive(Debug)]
pub struct Listener {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: String,
    },
}

impl Listener {
    /// Bind to the locator's address.
    ///
    /// For Unix sockets, removes any existing socket file at the path before
    /// binding and removes it again when the listener is dropped.
    pub async fn bind(locator: &Locator) -> Result<Self> {
        let family = locator.family();
        let address = locator.address();
        let fail = |e: std::io::Error| HijackError::transport(family, address, e);

        match family {
            Family::Stream => {
                let listener = TcpListener::bind(address).await.map_err(fail)?;
                Ok(Self {
                    inner: Inner::Tcp(listener),
                })
            }
            #[cfg(unix)]
            Family::Local => {
                // Remove old socket if it exists
                if std::path::Path::new(address).exists() {
                    std::fs::remove_file(address).map_err(fail)?;
                }
                let listener = tokio::net::UnixListener::bind(address).map_err(fail)?;
                Ok(Self {
                    inner: Inner::Unix {
                        listener,
                        path: address.to_string(),
                    },
                })
            }
            #[cfg(not(unix))]
            Family::Local => Err(fail(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<NetStream> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                tracing::debug!("Accepted tcp connection from {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Failed to disable Nagle for {}: {}", peer, e);
                }
                Ok(NetStream::Tcp(stream))
            }
            #[cfg(unix)]
            Inner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(NetStream::Unix(stream))
            }
        }
    }

    /// A locator string clients can dial to reach this listener.
    pub fn locator(&self) -> Result<String> {
        match &self.inner {
            Inner::Tcp(listener) => Ok(format!("tcp://{}", listener.local_addr()?)),
            #[cfg(unix)]
            Inner::Unix { path, .. } => Ok(format!(
                "unix://{}",
                utf8_percent_encode(path, SOCKET_PATH)
            )),
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        // Clean up socket file when listener is dropped
        if let Inner::Unix { path, .. } = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}
