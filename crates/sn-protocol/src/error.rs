//! Protocol error types

use thiserror::Error;

use crate::message::FrameKind;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown frame kind
    #[error("Unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload length does not match what the frame kind requires
    #[error("Invalid {kind:?} payload: expected {expected} bytes, got {actual}")]
    InvalidPayload {
        kind: FrameKind,
        expected: usize,
        actual: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
