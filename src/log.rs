//! Per-session logging capability.
//!
//! The pump reports advisory failures (a write side that would not
//! half-close) through a [`SessionLogger`] supplied with the session
//! options, so each session decides where its diagnostics go.

use std::fmt;

/// Receives debug-level diagnostics for one session.
pub trait SessionLogger: Send + Sync {
    /// Record a debug message.
    fn debug(&self, args: fmt::Arguments<'_>);
}

/// Discards everything. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl SessionLogger for NoopLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards to `tracing::debug!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!("{}", args);
    }
}
