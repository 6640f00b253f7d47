//! Frame kinds and decoded messages
//!
//! # Message Flow
//!
//! 1. The connecting peer sends `Hello` with `SessionId::UNASSIGNED` to ask
//!    for a new session, or with a previously issued id and auth id to
//!    resume one after a lost transport.
//! 2. The server answers with `Welcome` carrying the session's id and auth id.
//! 3. `Data` frames flow in both directions, each carrying one sequenced
//!    packet.
//! 4. The receiver answers with cumulative `Ack`s, and with `Nack`s for
//!    sequences it noticed missing.
//! 5. Either side ends the session with `Close`.

use crate::packet::Packet;
use crate::session::{AuthId, SessionId};

/// Frame kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Session request (new or resume)
    Hello = 0x01,
    /// Session grant
    Welcome = 0x02,
    /// Sequenced payload
    Data = 0x03,
    /// Cumulative acknowledgment
    Ack = 0x04,
    /// Negative acknowledgment of one sequence
    Nack = 0x05,
    /// Session teardown
    Close = 0x06,
}

impl FrameKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Welcome),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::Ack),
            0x05 => Some(Self::Nack),
            0x06 => Some(Self::Close),
            _ => None,
        }
    }

    /// Exact payload length this kind requires, if fixed
    pub fn fixed_payload_len(&self) -> Option<usize> {
        match self {
            Self::Hello | Self::Welcome => Some(HANDSHAKE_PAYLOAD_SIZE),
            Self::Ack | Self::Nack | Self::Close => Some(0),
            Self::Data => None,
        }
    }
}

/// Size of the Hello/Welcome payload: session id (8) + auth id (2)
pub const HANDSHAKE_PAYLOAD_SIZE: usize = 10;

/// Decoded protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request a session
    Hello {
        /// `SessionId::UNASSIGNED` for a fresh session
        session_id: SessionId,
        /// Ignored for fresh sessions
        auth_id: AuthId,
    },

    /// Session granted
    Welcome {
        /// Session id to present on reconnect
        session_id: SessionId,
        /// Auth id to present on reconnect
        auth_id: AuthId,
    },

    /// One sequenced packet
    Data(Packet),

    /// Everything up to and including this sequence was received
    Ack(u16),

    /// This sequence is missing
    Nack(u16),

    /// Session teardown
    Close,
}

impl Message {
    /// Get the frame kind for this message
    pub fn kind(&self) -> FrameKind {
        match self {
            Message::Hello { .. } => FrameKind::Hello,
            Message::Welcome { .. } => FrameKind::Welcome,
            Message::Data(_) => FrameKind::Data,
            Message::Ack(_) => FrameKind::Ack,
            Message::Nack(_) => FrameKind::Nack,
            Message::Close => FrameKind::Close,
        }
    }

    /// Sequence carried in the frame header (0 where unused)
    pub fn sequence(&self) -> u16 {
        match self {
            Message::Data(packet) => packet.sequence(),
            Message::Ack(seq) | Message::Nack(seq) => *seq,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_from_u8() {
        for kind in [
            FrameKind::Hello,
            FrameKind::Welcome,
            FrameKind::Data,
            FrameKind::Ack,
            FrameKind::Nack,
            FrameKind::Close,
        ] {
            assert_eq!(FrameKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(FrameKind::from_u8(0x00), None);
        assert_eq!(FrameKind::from_u8(0xFF), None);
    }

    #[test]
    fn test_message_sequence() {
        assert_eq!(Message::Ack(9).sequence(), 9);
        assert_eq!(Message::Data(Packet::new(65535, &b"x"[..])).sequence(), 65535);
        assert_eq!(Message::Close.sequence(), 0);
    }
}
