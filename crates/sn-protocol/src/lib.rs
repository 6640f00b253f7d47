//! sn-protocol: Wire protocol for selnet reliable sessions
//!
//! This crate defines the framing used between peers of the reactor, the
//! immutable [`Packet`] type, and the wraparound-aware 16-bit sequence
//! arithmetic the session layer orders and acknowledges packets with.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod packet;
pub mod sequence;
pub mod session;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{FrameKind, Message};
pub use packet::Packet;
pub use sequence::{
    is_greater_than, is_less_than, is_less_than_or_equal, next_sequence, sequence_cmp,
    sequence_diff,
};
pub use session::{AuthId, SessionId};
