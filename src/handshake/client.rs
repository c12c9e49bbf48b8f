//! Client side of the hijack handshake.
//!
//! Writes the request head over a freshly dialed connection, reads the
//! response head, then keeps the connection together with any bytes the
//! server sent past that head. Both a `101 Switching Protocols` answer and a
//! plain success status hand the connection over.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, UPGRADE};
use http::{Method, Request, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HijackError, Result};
use crate::options::SessionOptions;
use crate::transport::{dial, HijackedStream, Locator, NetStream};

/// Value sent in the `Upgrade` header.
pub const UPGRADE_PROTOCOL: &str = "tcp";

/// Host header used for Unix socket targets.
const LOCAL_HOST: &str = "localhost";

/// Largest response head accepted before giving up.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Most headers parsed from one response head.
const MAX_RESPONSE_HEADERS: usize = 64;

/// A client-side hijacked connection.
pub type ClientStream = HijackedStream<NetStream>;

/// Dial the session's target, perform the upgrade and return the raw stream.
///
/// Options are checked and the request is built before anything is dialed.
/// On failure after dialing, the connection is closed before returning.
pub async fn connect(options: &SessionOptions) -> Result<ClientStream> {
    options.validate()?;
    let body = options.body()?;
    let locator = Locator::parse(&options.url)?;
    let request = build_request(options, &locator, body)?;

    let stream = dial(&locator, &options.dial).await?;
    tracing::debug!(
        "Connected to {} {}, requesting upgrade",
        locator.family(),
        locator.address()
    );
    upgrade(stream, request).await
}

/// Build the upgrade request for `options` aimed at `locator`.
///
/// Header precedence: defaults first, then caller headers (a caller key
/// replaces every default value for that key and keeps all of its own), then
/// `Content-Length` for a body, then the Host header.
pub fn build_request(
    options: &SessionOptions,
    locator: &Locator,
    body: Option<Bytes>,
) -> Result<Request<Bytes>> {
    let method = Method::from_bytes(options.method.as_bytes()).map_err(|e| {
        HijackError::Validation(format!("invalid method {:?}: {}", options.method, e))
    })?;

    let has_body = body.is_some();
    let mut request = Request::builder()
        .method(method)
        .uri(locator.request_target())
        .body(body.unwrap_or_default())
        .map_err(|e| HijackError::Validation(format!("invalid request: {}", e)))?;
    let length = request.body().len();

    let headers = request.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    if options.upgrade_headers {
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static(UPGRADE_PROTOCOL));
    }

    for name in options.headers.keys() {
        headers.remove(name);
        for value in options.headers.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if has_body {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    let host = options
        .host
        .as_deref()
        .or_else(|| locator.authority())
        .unwrap_or(LOCAL_HOST);
    let host = HeaderValue::from_str(host)
        .map_err(|e| HijackError::Validation(format!("invalid host {:?}: {}", host, e)))?;
    headers.insert(HOST, host);

    Ok(request)
}

/// Send `request` over `io` and take the connection over once the server
/// answers `101 Switching Protocols` or a success status.
///
/// Interim `1xx` responses are skipped. Any other status is refused and
/// `io` is dropped before this returns. Works with any transport, which keeps
/// the handshake testable over in-memory streams.
pub async fn upgrade<S>(mut io: S, request: Request<Bytes>) -> Result<HijackedStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = encode_request_head(&request);
    io.write_all(&head).await.map_err(HijackError::Exchange)?;
    io.write_all(request.body()).await.map_err(HijackError::Exchange)?;
    io.flush().await.map_err(HijackError::Exchange)?;

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let (status, head_len) = read_response_head(&mut io, &mut buf).await?;
        buf.advance(head_len);

        if status == StatusCode::SWITCHING_PROTOCOLS || status.is_success() {
            tracing::debug!(
                "Connection hijacked after {} with {} bytes already buffered",
                status,
                buf.len()
            );
            return Ok(HijackedStream::new(io, buf.freeze()));
        }
        if status.is_informational() {
            tracing::trace!("Skipping interim response {}", status);
            continue;
        }

        tracing::debug!("Upgrade refused with {}", status);
        drop(io);
        return Err(HijackError::UpgradeRefused(status));
    }
}

/// Serialize the request line and headers.
fn encode_request_head(request: &Request<Bytes>) -> Vec<u8> {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(request.method().as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in request.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Read until `buf` holds a complete response head. Returns the status and
/// the length of the head; bytes after it stay in `buf`.
async fn read_response_head<S>(io: &mut S, buf: &mut BytesMut) -> Result<(StatusCode, usize)>
where
    S: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
            let mut response = httparse::Response::new(&mut headers);
            match response.parse(&buf[..]) {
                Ok(httparse::Status::Complete(len)) => {
                    let code = response.code.unwrap_or_default();
                    let status = StatusCode::from_u16(code).map_err(|e| {
                        HijackError::Hijack(format!("invalid response status {}: {}", code, e))
                    })?;
                    return Ok((status, len));
                }
                Ok(httparse::Status::Partial) => {}
                Err(e) => {
                    return Err(HijackError::Hijack(format!("malformed response head: {}", e)));
                }
            }
        }

        if buf.len() >= MAX_RESPONSE_HEAD {
            return Err(HijackError::Hijack(format!(
                "response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            )));
        }
        let n = io.read_buf(buf).await.map_err(HijackError::Exchange)?;
        if n == 0 {
            return Err(HijackError::Hijack(
                "connection closed before the response head".into(),
            ));
        }
    }
}
