//! Server side of the hijack handshake.
//!
//! [`serve_connection`] drives hyper's HTTP/1.1 server for a single request,
//! answers `101 Switching Protocols` when the request asked for an upgrade
//! and a plain `200` otherwise, then takes the connection back from hyper
//! together with any bytes it had read past the request. [`serve`] runs that
//! for every accepted connection.
//!
//! [`hijack_server`] covers callers that run their own hyper server with
//! upgrades enabled.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONNECTION, UPGRADE};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{HijackError, Result};
use crate::transport::{HijackedStream, Listener, NetStream};

/// A hijacked connection accepted by [`serve`].
pub type ServerStream = HijackedStream<NetStream>;

/// A connection taken over through hyper's upgrade machinery.
pub type UpgradedStream = HijackedStream<TokioIo<Upgraded>>;

type ResponseFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Response<Full<Bytes>>, Infallible>> + Send>>;

/// Conventional status for answering `req`: `101` when it asked for an
/// upgrade, `200` otherwise.
pub fn upgrade_status<B>(req: &Request<B>) -> StatusCode {
    if req.headers().contains_key(UPGRADE) {
        StatusCode::SWITCHING_PROTOCOLS
    } else {
        StatusCode::OK
    }
}

/// The response that opens a hijacked session for `req`.
///
/// A request carrying `Upgrade` gets `101` with the requested protocol
/// echoed back; any other request gets an empty `200`.
pub fn hijack_response<B>(req: &Request<B>) -> Result<Response<Full<Bytes>>> {
    let mut response = Response::builder().status(upgrade_status(req));
    if let Some(protocol) = req.headers().get(UPGRADE) {
        response = response
            .header(CONNECTION, HeaderValue::from_static("Upgrade"))
            .header(UPGRADE, protocol.clone());
    }
    response
        .body(Full::new(Bytes::new()))
        .map_err(|e| HijackError::Hijack(e.to_string()))
}

/// Prepare to take over an upgrade request on a connection served with
/// hyper's `with_upgrades()`.
///
/// Returns the `101` response to send and a handle resolving to the raw
/// stream after that response is written. hyper only releases a connection
/// this way after `101`, so a request without `Upgrade` is refused here;
/// [`serve_connection`] hijacks those too.
pub fn hijack_server<B>(req: &mut Request<B>) -> Result<(Response<Full<Bytes>>, PendingHijack)> {
    if !req.headers().contains_key(UPGRADE) {
        return Err(HijackError::Hijack(
            "request did not ask for a protocol upgrade".into(),
        ));
    }
    let response = hijack_response(req)?;
    let pending = PendingHijack {
        on_upgrade: hyper::upgrade::on(req),
    };
    Ok((response, pending))
}

/// A connection that will switch to raw mode once its response is sent.
#[derive(Debug)]
pub struct PendingHijack {
    on_upgrade: OnUpgrade,
}

impl PendingHijack {
    /// Wait for the switch, flush the connection and return it.
    ///
    /// Bytes the client sent after its request head are replayed by the
    /// returned stream.
    pub async fn into_stream(self) -> Result<UpgradedStream> {
        let upgraded = self.on_upgrade.await?;
        let mut stream = HijackedStream::new(TokioIo::new(upgraded), Bytes::new());
        announce(&mut stream).await?;
        Ok(stream)
    }
}

/// Zero-length flush so the peer observes the switch promptly.
async fn announce<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let flushed = async {
        stream.write_all(&[]).await?;
        stream.flush().await
    }
    .await;
    flushed.map_err(|e| HijackError::Hijack(format!("flush after the switch failed: {}", e)))
}

/// The request that opened a hijacked session, body collected.
#[derive(Debug, Clone)]
pub struct HijackedRequest {
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

impl HijackedRequest {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Whether the client asked for a protocol upgrade.
    pub fn is_upgrade(&self) -> bool {
        self.headers.contains_key(UPGRADE)
    }
}

/// Serve the single request on `io`, then hand the hijacked connection to
/// `handler` and wait for it to finish.
///
/// The connection is not kept alive: after the `101` or `200` response the
/// session owns it. A connection that closes before a complete request, or
/// whose body cannot be read, resolves without calling `handler`.
pub async fn serve_connection<I, F, Fut>(io: I, handler: F) -> Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(HijackedRequest, HijackedStream<I>) -> Fut,
    Fut: Future<Output = ()>,
{
    let accepted: Arc<Mutex<Option<HijackedRequest>>> = Arc::default();
    let slot = Arc::clone(&accepted);
    let service = service_fn(move |req: Request<Incoming>| -> ResponseFuture {
        let slot = Arc::clone(&slot);
        Box::pin(async move { Ok::<_, Infallible>(accept_request(req, &slot).await) })
    });

    let parts = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(io), service)
        .without_shutdown()
        .await?;

    let request = accepted.lock().ok().and_then(|mut slot| slot.take());
    let Some(request) = request else {
        tracing::debug!("Connection ended without a session request");
        return Ok(());
    };

    tracing::debug!(
        "Hijacked {} {} with {} bytes already buffered",
        request.method,
        request.uri,
        parts.read_buf.len()
    );
    let mut stream = HijackedStream::new(parts.io.into_inner(), parts.read_buf);
    announce(&mut stream).await?;
    handler(request, stream).await;
    Ok(())
}

/// Accept connections from `listener` forever, serving each on its own task.
///
/// Per-connection failures are logged; only accept failures end the loop.
pub async fn serve<F, Fut>(listener: Listener, handler: F) -> Result<()>
where
    F: Fn(HijackedRequest, ServerStream) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let stream = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, handler).await {
                tracing::error!("Connection error: {}", e);
            }
        });
    }
}

/// Collect the request and record it for the hijack. The body has to be
/// consumed before hyper finishes with the connection.
async fn accept_request(
    req: Request<Incoming>,
    slot: &Mutex<Option<HijackedRequest>>,
) -> Response<Full<Bytes>> {
    let response = match hijack_response(&req) {
        Ok(response) => response,
        Err(e) => return plain(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("Failed to read request body: {}", e);
            return plain(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let request = HijackedRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    match slot.lock() {
        Ok(mut slot) => *slot = Some(request),
        Err(_) => return plain(StatusCode::INTERNAL_SERVER_ERROR, "session lost".into()),
    }
    response
}

fn plain(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}
