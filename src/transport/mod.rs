//! Transport module - locator resolution, dialing and listening.
//!
//! Provides abstraction over:
//! - TCP, optionally TLS-negotiated (rustls)
//! - Unix Domain Sockets (Linux/macOS)

mod dial;
mod listener;
mod locator;
mod stream;

pub use dial::{dial, DialConfig, NetStream};
pub use listener::Listener;
pub use locator::{
    is_encrypted_scheme, Family, Locator, DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT, UNIX_SCHEME,
};
pub use stream::{HalfClose, HijackedStream};
