//! Frame header encoding/decoding
//!
//! The frame format uses a 6-byte header:
//! - kind: 1 byte (u8)
//! - sequence: 2 bytes (u16, big-endian)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::FrameKind;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 6;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header carrying kind, sequence and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Kind of frame
    pub kind: FrameKind,
    /// Packet sequence (data, ack, nack) or 0
    pub sequence: u16,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(kind: FrameKind, sequence: u16, payload_length: u32) -> Self {
        Self {
            kind,
            sequence,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.kind.as_u8());
        dst.put_u16(self.sequence);
        // payload_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown frame kind).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming anything
        let kind_byte = src[0];
        let kind = FrameKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;

        src.advance(1);
        let sequence = src.get_u16();
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            kind,
            sequence,
            payload_length,
        }))
    }
}
