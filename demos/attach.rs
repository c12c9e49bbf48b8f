//! Attach demo - an exec endpoint and a client in one process.
//!
//! This example demonstrates:
//! - Serving upgrade requests with `serve` and a session handler
//! - Writing stdout and stderr frames through the multiplexing writer
//! - Running a client session that demultiplexes them to the terminal
//!
//! ```text
//! RUST_LOG=hijack_stream=debug cargo run --example attach -- "hello there"
//! ```

use hijack_stream::handshake::ServerStream;
use hijack_stream::transport::{Listener, Locator};
use hijack_stream::{
    hijack_http_request, serve, spawn_mux_writer, HijackedRequest, MuxWriterConfig,
    SessionOptions, TracingLogger,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Body of an exec request.
#[derive(Serialize, Deserialize, Debug)]
struct ExecRequest {
    cmd: String,
    args: Vec<String>,
}

/// Pretend to run the command: echo arguments and stdin on stdout, complain
/// on stderr about anything unknown.
async fn exec(req: HijackedRequest, stream: ServerStream) {
    let exec: ExecRequest = match req.json() {
        Ok(exec) => exec,
        Err(e) => {
            tracing::warn!("Bad exec request: {}", e);
            return;
        }
    };

    let (mut read, write) = tokio::io::split(stream);
    let (mux, task) = spawn_mux_writer(write, MuxWriterConfig::default());

    let result = async {
        if exec.cmd != "echo" {
            mux.stderr(format!("{}: command not found\n", exec.cmd)).await?;
            return Ok(());
        }
        mux.stdout(format!("{}\n", exec.args.join(" "))).await?;

        let mut stdin = Vec::new();
        read.read_to_end(&mut stdin).await?;
        if !stdin.is_empty() {
            mux.stdout(stdin).await?;
        }
        Ok::<(), hijack_stream::HijackError>(())
    }
    .await;

    drop(mux);
    if let Err(e) = result.and(task.await.unwrap_or(Ok(()))) {
        tracing::warn!("Exec session failed: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let listener = Listener::bind(&Locator::parse("tcp://127.0.0.1:0")?).await?;
    let url = format!("{}/exec", listener.locator()?);
    tokio::spawn(serve(listener, exec));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = SessionOptions::builder()
        .method("POST")
        .url(url)
        .payload(&ExecRequest {
            cmd: "echo".into(),
            args,
        })
        .multiplexed(true)
        .input(tokio::io::stdin())
        .output(tokio::io::stdout())
        .error(tokio::io::stderr())
        .logger(Arc::new(TracingLogger))
        .build();

    hijack_http_request(options).await?;
    Ok(())
}
