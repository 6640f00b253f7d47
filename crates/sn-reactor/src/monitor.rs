//! Reactor observation hooks
//!
//! The demultiplexer reports its lifecycle and every wait cycle to a
//! [`ReactorMonitor`]. Callbacks run on the reactor thread and must not
//! block; every method defaults to doing nothing, so [`NoopMonitor`] is
//! always a legal substitute.

use std::io;

use mio::Token;

/// Observer of demultiplexer activity
pub trait ReactorMonitor: Send + Sync {
    /// The reactor thread has been started
    fn startup(&self) {}

    /// The reactor thread has exited and shutdown completed
    fn shutdown(&self) {}

    /// The loop thread entered its wait loop
    fn enter_loop(&self) {}

    /// The loop thread left its wait loop
    fn exit_loop(&self) {}

    /// About to block in a readiness wait
    fn enter_select(&self) {}

    /// A readiness wait returned with `ready` events
    fn select_completed(&self, _ready: usize) {}

    /// A readiness wait failed; the cycle is treated as empty
    fn select_failed(&self, _error: &io::Error) {}

    /// About to dispatch one ready key
    fn handle_event(&self, _token: Token) {}

    /// Closing the primitive or a channel failed
    fn close_error(&self, _error: &io::Error) {}

    /// A ready key had no registration; the event was dropped
    fn invalid_attachment(&self, _token: Token) {}
}

/// Monitor that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl ReactorMonitor for NoopMonitor {}

/// Monitor that forwards every callback to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl ReactorMonitor for TracingMonitor {
    fn startup(&self) {
        tracing::info!("Reactor started");
    }

    fn shutdown(&self) {
        tracing::info!("Reactor stopped");
    }

    fn enter_loop(&self) {
        tracing::debug!("Reactor entering wait loop");
    }

    fn exit_loop(&self) {
        tracing::debug!("Reactor leaving wait loop");
    }

    fn enter_select(&self) {
        tracing::trace!("Waiting for readiness");
    }

    fn select_completed(&self, ready: usize) {
        tracing::trace!(ready, "Readiness wait returned");
    }

    fn select_failed(&self, error: &io::Error) {
        tracing::warn!("Readiness wait failed: {}", error);
    }

    fn handle_event(&self, token: Token) {
        tracing::trace!(token = token.0, "Dispatching ready key");
    }

    fn close_error(&self, error: &io::Error) {
        tracing::warn!("Error while closing: {}", error);
    }

    fn invalid_attachment(&self, token: Token) {
        tracing::warn!(token = token.0, "Ready key has no registration, event dropped");
    }
}
