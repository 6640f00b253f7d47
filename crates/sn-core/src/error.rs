//! Core error types for selnet

use std::path::PathBuf;
use std::time::Duration;

use sn_protocol::{ProtocolError, SessionId};
use thiserror::Error;

use crate::types::SessionStatus;

/// Top-level error type for the selnet workspace
#[derive(Error, Debug)]
pub enum NetError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reactor error
    #[error("Reactor error: {0}")]
    Reactor(#[from] ReactorError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Demultiplexer errors
///
/// Only precondition violations and startup failures surface here; I/O
/// trouble inside the running loop is absorbed and reported to the monitor.
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The channel handed to `register` is absent or already closed
    #[error("Cannot register an absent or closed channel")]
    ChannelAbsent,

    /// `startup` on a running demultiplexer
    #[error("Demultiplexer is already running")]
    AlreadyRunning,

    /// Operation that needs a running demultiplexer
    #[error("Demultiplexer is not running")]
    NotRunning,

    /// The readiness primitive could not be opened
    #[error("Failed to open readiness primitive: {0}")]
    Startup(#[source] std::io::Error),

    /// The key was cancelled or belongs to an earlier run
    #[error("Selection key {0} is no longer registered")]
    KeyCancelled(usize),

    /// The OS rejected a registration or interest update
    #[error("Registration failed: {0}")]
    Registration(#[source] std::io::Error),

    /// The loop thread did not exit in time
    #[error("Reactor thread did not stop within {0:?}")]
    ShutdownTimedOut(Duration),
}

/// Per-connection transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport has been closed
    #[error("Transport is closed")]
    Closed,

    /// Framing error on the receive path
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reactor refused the interest update
    #[error("Reactor error: {0}")]
    Reactor(#[from] ReactorError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// Reconnect presented the wrong auth id
    #[error("Authentication id mismatch for {0}")]
    AuthMismatch(SessionId),

    /// Status change not allowed from the current state
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A packet with this sequence is already queued
    #[error("Duplicate packet sequence {0}")]
    DuplicateSequence(u16),

    /// The session has no transport attached
    #[error("Session has no transport")]
    NoTransport,

    /// Transport failure while sending
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
