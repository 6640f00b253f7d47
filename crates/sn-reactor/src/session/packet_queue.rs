//! Outbound packets awaiting acknowledgment

use std::collections::VecDeque;

use sn_core::error::SessionError;
use sn_protocol::{is_less_than, Packet};

pub use sn_protocol::is_less_than_or_equal;

/// Unacknowledged packets in wraparound sequence order
///
/// The queue also remembers which of these packets the peer reported
/// missing, so a repeated nack for the same gap does not resend again.
/// Acks covering a nacked sequence clear it.
#[derive(Debug, Default, Clone)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
    nacks: Vec<u16>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a packet at its ordered position
    ///
    /// Fails if a packet with the same sequence is already queued.
    pub fn add_packet(&mut self, packet: Packet) -> Result<(), SessionError> {
        let sequence = packet.sequence();
        if self.packets.iter().any(|p| p.sequence() == sequence) {
            return Err(SessionError::DuplicateSequence(sequence));
        }

        // The comparator is not a total order over the whole u16 space, so
        // place by scanning instead of sorting.
        let index = self
            .packets
            .iter()
            .position(|p| is_less_than(sequence, p.sequence()))
            .unwrap_or(self.packets.len());
        self.packets.insert(index, packet);
        Ok(())
    }

    /// Cumulatively acknowledge everything up to and including `sequence`
    ///
    /// Returns `true` if the ack removed at least one packet, `false` for a
    /// duplicate or stale ack.
    pub fn ack(&mut self, sequence: u16) -> bool {
        let before = self.packets.len();
        self.packets
            .retain(|p| !is_less_than_or_equal(p.sequence(), sequence));
        self.nacks.retain(|n| !is_less_than_or_equal(*n, sequence));
        self.packets.len() != before
    }

    /// Exact-sequence lookup for retransmission
    pub fn get_packet(&self, sequence: u16) -> Option<&Packet> {
        self.packets.iter().find(|p| p.sequence() == sequence)
    }

    /// Lowest-ordered packet
    pub fn peek(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Remove and return the lowest-ordered packet
    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Packets from `sequence` onward, in order
    pub fn from_sequence(&self, sequence: u16) -> impl Iterator<Item = &Packet> {
        self.packets
            .iter()
            .skip_while(move |p| p.sequence() != sequence)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Remember a peer nack; returns `false` if it was already pending
    pub fn record_nack(&mut self, sequence: u16) -> bool {
        if self.nacks.contains(&sequence) {
            return false;
        }
        self.nacks.push(sequence);
        true
    }

    pub fn pending_nacks(&self) -> &[u16] {
        &self.nacks
    }
}
