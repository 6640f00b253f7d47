//! Readiness events and the queue/pump pipeline
//!
//! Select handlers on the reactor thread translate readiness into
//! [`Event`]s and push them onto an [`EventQueue`]. One or more
//! [`EventPump`]s drain the queue in bounded batches on application
//! threads.

mod pump;
mod queue;

use std::fmt;
use std::io;

use mio::Token;

use crate::transport::SharedTransport;

pub use pump::{run_cooperative, EventHandler, EventPump, Refresh};
pub use queue::{EventQueue, QueueFull};

/// Notification produced on the reactor thread
#[derive(Debug)]
pub enum Event {
    /// A listener accepted a new connection
    Accept { transport: SharedTransport },
    /// A listener reported pending connections
    AcceptPossible { listener: Token },
    /// An outbound connect completed
    Connect { transport: SharedTransport },
    /// An outbound connect reported progress
    ConnectPossible { transport: SharedTransport },
    /// Bytes were appended to the receive buffer
    Readable { transport: SharedTransport, bytes: usize },
    /// Queued bytes were written
    Writable { transport: SharedTransport, bytes: usize },
    /// The receive buffer reached its limit
    BufferOverflow { transport: SharedTransport, limit: usize },
    /// Write or socket-level failure
    IoError {
        transport: SharedTransport,
        error: io::Error,
    },
    /// An outbound connect failed
    ConnectError {
        transport: SharedTransport,
        error: io::Error,
    },
    /// A read failed
    ReadError {
        transport: SharedTransport,
        error: io::Error,
    },
    /// The peer closed the connection
    ChannelClosed { transport: SharedTransport },
}

/// Discriminant of an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Accept,
    AcceptPossible,
    Connect,
    ConnectPossible,
    Readable,
    Writable,
    BufferOverflow,
    IoError,
    ConnectError,
    ReadError,
    ChannelClosed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Accept => "accept",
            EventKind::AcceptPossible => "accept-possible",
            EventKind::Connect => "connect",
            EventKind::ConnectPossible => "connect-possible",
            EventKind::Readable => "readable",
            EventKind::Writable => "writable",
            EventKind::BufferOverflow => "buffer-overflow",
            EventKind::IoError => "io-error",
            EventKind::ConnectError => "connect-error",
            EventKind::ReadError => "read-error",
            EventKind::ChannelClosed => "channel-closed",
        };
        f.write_str(name)
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Accept { .. } => EventKind::Accept,
            Event::AcceptPossible { .. } => EventKind::AcceptPossible,
            Event::Connect { .. } => EventKind::Connect,
            Event::ConnectPossible { .. } => EventKind::ConnectPossible,
            Event::Readable { .. } => EventKind::Readable,
            Event::Writable { .. } => EventKind::Writable,
            Event::BufferOverflow { .. } => EventKind::BufferOverflow,
            Event::IoError { .. } => EventKind::IoError,
            Event::ConnectError { .. } => EventKind::ConnectError,
            Event::ReadError { .. } => EventKind::ReadError,
            Event::ChannelClosed { .. } => EventKind::ChannelClosed,
        }
    }

    /// Originating transport; `None` only for listener events
    pub fn transport(&self) -> Option<&SharedTransport> {
        match self {
            Event::AcceptPossible { .. } => None,
            Event::Accept { transport }
            | Event::Connect { transport }
            | Event::ConnectPossible { transport }
            | Event::Readable { transport, .. }
            | Event::Writable { transport, .. }
            | Event::BufferOverflow { transport, .. }
            | Event::IoError { transport, .. }
            | Event::ConnectError { transport, .. }
            | Event::ReadError { transport, .. }
            | Event::ChannelClosed { transport } => Some(transport),
        }
    }

    /// Whether the event ends the transport's useful life
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::IoError
                | EventKind::ConnectError
                | EventKind::ReadError
                | EventKind::ChannelClosed
        )
    }
}
