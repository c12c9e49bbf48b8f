//! Integration tests for hijack-stream.
//!
//! Each test runs a real HTTP/1.1 upgrade between the client session and
//! the server helpers over loopback TCP or a Unix socket.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use hijack_stream::protocol::Channel;
use hijack_stream::transport::{Listener, Locator};
use hijack_stream::{
    hijack_http_request, serve, spawn_mux_writer, ErrorKind, HijackedRequest, MuxWriterConfig,
    SessionOptions,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

/// Sink whose contents can be inspected after the session.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl AsyncWrite for Captured {
    fn poll_write(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Deserialize)]
struct ExecRequest {
    cmd: String,
}

/// Bind a loopback listener and return it with its locator string.
async fn tcp_listener() -> (Listener, String) {
    let listener = Listener::bind(&Locator::parse("tcp://127.0.0.1:0").unwrap())
        .await
        .unwrap();
    let url = listener.locator().unwrap();
    (listener, url)
}

/// Fake exec endpoint: answers `ls` on stdout with a warning on stderr.
async fn exec_handler(req: HijackedRequest, stream: hijack_stream::handshake::ServerStream) {
    let exec: ExecRequest = req.json().unwrap();
    assert_eq!(exec.cmd, "ls");

    let (_read, write) = tokio::io::split(stream);
    let (mux, task) = spawn_mux_writer(write, MuxWriterConfig::default());
    mux.stdout("a.txt\n").await.unwrap();
    mux.stderr("warn\n").await.unwrap();
    drop(mux);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_exec_session_multiplexed() {
    let (listener, url) = tcp_listener().await;
    tokio::spawn(serve(listener, exec_handler));

    let out = Captured::default();
    let err = Captured::default();
    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("{}/exec", url))
        .payload(&serde_json::json!({"cmd": "ls"}))
        .multiplexed(true)
        .output(out.clone())
        .error(err.clone())
        .build();

    hijack_http_request(options).await.unwrap();

    assert_eq!(out.text(), "a.txt\n");
    assert_eq!(err.text(), "warn\n");
}

#[tokio::test]
async fn test_attach_session_raw_echo() {
    let (listener, url) = tcp_listener().await;
    tokio::spawn(serve(listener, |req: HijackedRequest, mut stream| async move {
        assert_eq!(req.uri.path(), "/attach");
        let mut input = Vec::new();
        stream.read_to_end(&mut input).await.unwrap();
        input.make_ascii_uppercase();
        stream.write_all(&input).await.unwrap();
        stream.shutdown().await.unwrap();
    }));

    let out = Captured::default();
    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("{}/attach", url))
        .input(io::Cursor::new(b"hello\nworld\n".to_vec()))
        .output(out.clone())
        .build();

    hijack_http_request(options).await.unwrap();
    assert_eq!(out.text(), "HELLO\nWORLD\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_session_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exec session.sock");
    let url = format!("unix://{}", path.display());

    let listener = Listener::bind(&Locator::parse(&url).unwrap()).await.unwrap();
    tokio::spawn(serve(listener, exec_handler));

    let out = Captured::default();
    let err = Captured::default();
    let options = SessionOptions::builder()
        .method("POST")
        .url(url)
        .payload(&serde_json::json!({"cmd": "ls"}))
        .multiplexed(true)
        .output(out.clone())
        .error(err.clone())
        .build();

    hijack_http_request(options).await.unwrap();
    assert_eq!(out.text(), "a.txt\n");
    assert_eq!(err.text(), "warn\n");
}

#[tokio::test]
async fn test_plain_success_session_without_upgrade_headers() {
    let (listener, url) = tcp_listener().await;
    tokio::spawn(serve(listener, |req: HijackedRequest, mut stream| async move {
        assert!(!req.is_upgrade());
        let mut input = Vec::new();
        stream.read_to_end(&mut input).await.unwrap();
        input.make_ascii_uppercase();
        stream.write_all(&input).await.unwrap();
        stream.shutdown().await.unwrap();
    }));

    let out = Captured::default();
    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("{}/attach", url))
        .upgrade_headers(false)
        .input(io::Cursor::new(b"quiet\n".to_vec()))
        .output(out.clone())
        .build();

    hijack_http_request(options).await.unwrap();
    assert_eq!(out.text(), "QUIET\n");
}

#[tokio::test]
async fn test_raw_stream_after_plain_ok_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).await.unwrap();
            assert!(n > 0, "request head cut short");
            head.extend_from_slice(&buf[..n]);
        }
        let head = String::from_utf8(head).unwrap().to_ascii_lowercase();
        assert!(!head.contains("upgrade:"), "{}", head);

        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n")
            .await
            .unwrap();
        sock.write_all(b"raw output").await.unwrap();
        // Close once the client has half-closed its side.
        let mut rest = Vec::new();
        sock.read_to_end(&mut rest).await.unwrap();
    });

    let out = Captured::default();
    let options = SessionOptions::builder()
        .method("GET")
        .url(format!("tcp://127.0.0.1:{}/logs", port))
        .upgrade_headers(false)
        .output(out.clone())
        .build();

    hijack_http_request(options).await.unwrap();
    assert_eq!(out.text(), "raw output");
}

#[tokio::test]
async fn test_headers_reach_server() {
    let (listener, url) = tcp_listener().await;
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(serve(listener, move |req: HijackedRequest, _stream| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(req.headers);
        }
    }));

    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("{}/exec", url))
        .host("exec.internal")
        .header("X-Session", "first")
        .header("x-session", "second")
        .header("Accept", "text/plain")
        .append_header("accept", "application/json")
        .build();
    hijack_http_request(options).await.unwrap();

    let headers = seen_rx.recv().await.unwrap();
    assert_eq!(headers["host"], "exec.internal");
    assert_eq!(headers["content-type"], "text/plain");
    assert_eq!(headers["upgrade"], "tcp");
    let sessions: Vec<_> = headers.get_all("x-session").iter().collect();
    assert_eq!(sessions, ["second"]);
    let accepted: Vec<_> = headers.get_all("accept").iter().collect();
    assert_eq!(accepted, ["text/plain", "application/json"]);
}

#[tokio::test]
async fn test_refused_upgrade_is_handshake_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            head.extend_from_slice(&buf[..n]);
        }
        sock.write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("tcp://127.0.0.1:{}/exec", port))
        .build();

    let err = hijack_http_request(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_dial_failure_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let options = SessionOptions::builder()
        .method("POST")
        .url(format!("tcp://127.0.0.1:{}/exec", port))
        .build();

    let err = hijack_http_request(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_invalid_options_fail_before_io() {
    let options = SessionOptions::builder().url("tcp://127.0.0.1:9/exec").build();
    let err = hijack_http_request(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut bad = std::collections::HashMap::new();
    bad.insert(vec![1u8], 1);
    let options = SessionOptions::builder()
        .method("POST")
        .url("tcp://127.0.0.1:9/exec")
        .payload(&bad)
        .build();
    let err = hijack_http_request(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PayloadEncode);
}

#[tokio::test]
async fn test_large_stdout_is_chunked_and_reassembled() {
    let (listener, url) = tcp_listener().await;
    let blob: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let expected = blob.clone();

    tokio::spawn(serve(listener, move |_req: HijackedRequest, stream| {
        let blob = blob.clone();
        async move {
            let (_read, write) = tokio::io::split(stream);
            let (mux, task) = spawn_mux_writer(write, MuxWriterConfig::default());
            mux.send(Channel::Stdout, blob).await.unwrap();
            drop(mux);
            task.await.unwrap().unwrap();
        }
    }));

    let out = Captured::default();
    let options = SessionOptions::builder()
        .method("GET")
        .url(format!("{}/logs", url))
        .multiplexed(true)
        .output(out.clone())
        .build();

    hijack_http_request(options).await.unwrap();
    assert_eq!(*out.0.lock().unwrap(), expected);
}
