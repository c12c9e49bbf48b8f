//! HTTP upgrade handshake, both directions.
//!
//! - `client`: dial, send the request, take the connection over after `101` or `2xx`
//! - `server`: answer a request with `101` or `200` and take the connection over

mod client;
mod server;

pub use client::{build_request, connect, upgrade, ClientStream, UPGRADE_PROTOCOL};
pub use server::{
    hijack_response, hijack_server, serve, serve_connection, upgrade_status, HijackedRequest,
    PendingHijack, ServerStream, UpgradedStream,
};
