//! Dialing a [`Locator`] into a connected stream.
//!
//! - `unix` locators: Unix Domain Socket
//! - encrypted schemes: TCP + TLS (rustls)
//! - everything else: plain TCP
//!
//! # Example
//!
//! ```ignore
//! use hijack_stream::transport::{dial, DialConfig, Locator};
//!
//! let locator = Locator::parse("https://example.com/exec")?;
//! let stream = dial(&locator, &DialConfig::default()).await?;
//! ```

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::locator::{Family, Locator};
use super::stream::HalfClose;
use crate::error::{HijackError, Result};

/// Dialer configuration.
#[derive(Debug, Clone, Default)]
pub struct DialConfig {
    /// TLS client configuration for encrypted schemes.
    ///
    /// When unset, a configuration trusting the webpki root set is built.
    pub tls: Option<Arc<ClientConfig>>,
}

impl DialConfig {
    /// Use the given TLS client configuration.
    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }
}

/// A connected transport stream, dialed or accepted.
#[derive(Debug)]
pub enum NetStream {
    /// Plain TCP.
    Tcp(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix Domain Socket.
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl NetStream {
    /// Protocol family of this connection.
    pub fn family(&self) -> Family {
        match self {
            NetStream::Tcp(_) | NetStream::Tls(_) => Family::Stream,
            #[cfg(unix)]
            NetStream::Unix(_) => Family::Local,
        }
    }

    /// Whether the connection is TLS-negotiated.
    pub fn is_tls(&self) -> bool {
        matches!(self, NetStream::Tls(_))
    }
}

/// Dial the locator's address.
///
/// Failures are reported as transport errors naming the family and address.
/// Nothing is retried here.
pub async fn dial(locator: &Locator, config: &DialConfig) -> Result<NetStream> {
    let family = locator.family();
    let address = locator.address();
    let fail = |e: io::Error| HijackError::transport(family, address, e);

    match family {
        Family::Local => {
            tracing::debug!("Dialing unix {}", address);
            dial_unix(address).await.map_err(fail)
        }
        Family::Stream => {
            tracing::debug!("Dialing tcp {} (tls: {})", address, locator.is_tls());
            let tcp = TcpStream::connect(address).await.map_err(fail)?;
            // Small interactive writes should not wait for Nagle.
            if let Err(e) = tcp.set_nodelay(true) {
                tracing::debug!("Failed to disable Nagle on {}: {}", address, e);
            }

            if !locator.is_tls() {
                return Ok(NetStream::Tcp(tcp));
            }

            let server_name = locator
                .server_name()
                .ok_or_else(|| fail(io::Error::new(io::ErrorKind::InvalidInput, "missing host")))
                .and_then(|name| {
                    ServerName::try_from(name.to_string())
                        .map_err(|e| fail(io::Error::new(io::ErrorKind::InvalidInput, e)))
                })?;

            let tls_config = match &config.tls {
                Some(tls) => tls.clone(),
                None => default_tls_config().map_err(fail)?,
            };

            let tls = TlsConnector::from(tls_config)
                .connect(server_name, tcp)
                .await
                .map_err(fail)?;
            Ok(NetStream::Tls(Box::new(tls)))
        }
    }
}

#[cfg(unix)]
async fn dial_unix(path: &str) -> io::Result<NetStream> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(NetStream::Unix(stream))
}

#[cfg(not(unix))]
async fn dial_unix(_path: &str) -> io::Result<NetStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not available on this platform",
    ))
}

/// Build a client configuration trusting the webpki roots.
fn default_tls_config() -> io::Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            NetStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            NetStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            NetStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    /// Closes the write direction only.
    ///
    /// TLS sends `close_notify` first, then shuts down the TCP write side.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            NetStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl HalfClose for NetStream {}
