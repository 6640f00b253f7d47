//! Sequenced packet type

use bytes::Bytes;

/// An immutable sequence-numbered payload.
///
/// Packets are what the session layer keeps around until the peer
/// acknowledges them, and what it resends on a negative acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sequence: u16,
    payload: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// Sequence number of this packet
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Payload bytes (cheap to clone)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_accessors() {
        let packet = Packet::new(7, &b"hello"[..]);
        assert_eq!(packet.sequence(), 7);
        assert_eq!(packet.payload().as_ref(), b"hello");
        assert_eq!(packet.len(), 5);
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_packet_clone_shares_payload() {
        let packet = Packet::new(1, Bytes::from_static(b"abc"));
        let copy = packet.clone();
        assert_eq!(packet, copy);
        assert_eq!(packet.payload().as_ptr(), copy.payload().as_ptr());
    }
}
