//! Reliable session over a replaceable transport

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;

use sn_core::error::SessionError;
use sn_core::time::current_time_millis;
use sn_core::SessionStatus;
use sn_protocol::{is_less_than_or_equal, next_sequence, AuthId, Message, Packet, SessionId};

use super::packet_queue::PacketQueue;
use crate::transport::{self, SharedTransport};

/// Outcome of [`Session::receive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Next in order; hand it to the application
    Delivered(Packet),
    /// Already delivered earlier; re-acknowledged
    Duplicate,
    /// Ahead of the next expected sequence; dropped and nacked
    OutOfOrder { missing: u16 },
}

struct SessionState {
    status: SessionStatus,
    status_changed_at: u64,
    transport: Option<SharedTransport>,
    last_delivered: Option<u16>,
    /// Inbound gap already nacked, until it is filled
    pending_nack: Option<u16>,
    next_sequence: u16,
}

/// One logical connection that survives transport replacement
///
/// Locks are always taken in the order session state, packet queue,
/// transport.
pub struct Session {
    id: SessionId,
    auth_id: AuthId,
    state: Mutex<SessionState>,
    packets: Mutex<PacketQueue>,
}

impl Session {
    pub fn new(id: SessionId, auth_id: AuthId) -> Self {
        Self {
            id,
            auth_id,
            state: Mutex::new(SessionState {
                status: SessionStatus::NotConnected,
                status_changed_at: current_time_millis(),
                transport: None,
                last_delivered: None,
                pending_nack: None,
                next_sequence: 0,
            }),
            packets: Mutex::new(PacketQueue::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn auth_id(&self) -> AuthId {
        self.auth_id
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    /// Unix millis of the last status change
    pub fn time_of_last_status_change(&self) -> u64 {
        self.lock_state().status_changed_at
    }

    pub fn transport(&self) -> Option<SharedTransport> {
        self.lock_state().transport.clone()
    }

    /// Sequence of the last packet handed to the application
    pub fn last_delivered(&self) -> Option<u16> {
        self.lock_state().last_delivered
    }

    /// First missing inbound sequence that has been nacked
    pub fn pending_nack(&self) -> Option<u16> {
        self.lock_state().pending_nack
    }

    /// Unacknowledged outbound packets
    pub fn packets(&self) -> MutexGuard<'_, PacketQueue> {
        self.packets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut SessionState, to: SessionStatus) {
        if state.status != to {
            tracing::debug!(session = %self.id, from = %state.status, %to, "Session status changed");
        }
        state.status = to;
        state.status_changed_at = current_time_millis();
    }

    /// Attach `transport`, closing whatever was attached before
    ///
    /// The transport gets a weak back-reference to this session. Allowed
    /// from any status; the session becomes `Connected`.
    pub fn set_transport(self: &Arc<Self>, transport: SharedTransport) {
        let mut state = self.lock_state();

        if let Some(previous) = state.transport.take() {
            if !Arc::ptr_eq(&previous, &transport) {
                let mut previous = transport::lock(&previous);
                previous.set_user_data(None);
                previous.close();
            }
        }

        let owner: Weak<dyn Any + Send + Sync> = Arc::downgrade(self) as Weak<dyn Any + Send + Sync>;
        transport::lock(&transport).set_user_data(Some(owner));
        state.transport = Some(transport);
        self.transition(&mut state, SessionStatus::Connected);
    }

    /// Detach the current transport without closing it
    pub fn detach_transport(&self) -> Option<SharedTransport> {
        let detached = self.lock_state().transport.take();
        if let Some(transport) = &detached {
            transport::lock(transport).set_user_data(None);
        }
        detached
    }

    /// `Connected` -> `Established`
    pub fn establish(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        if state.status != SessionStatus::Connected {
            return Err(SessionError::InvalidTransition {
                from: state.status,
                to: SessionStatus::Established,
            });
        }
        self.transition(&mut state, SessionStatus::Established);
        Ok(())
    }

    /// The transport failed; keep the session for a later resume
    ///
    /// Marking an already lost session again is a no-op.
    pub fn mark_lost(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        match state.status {
            SessionStatus::Lost => return Ok(()),
            SessionStatus::Connected | SessionStatus::Established => {}
            from => {
                return Err(SessionError::InvalidTransition {
                    from,
                    to: SessionStatus::Lost,
                })
            }
        }

        if let Some(transport) = state.transport.take() {
            let mut transport = transport::lock(&transport);
            transport.set_user_data(None);
            transport.close();
        }
        self.transition(&mut state, SessionStatus::Lost);
        Ok(())
    }

    /// Tear the session down, telling the peer if a transport is attached
    pub fn disconnect(&self) {
        let mut state = self.lock_state();
        if let Some(transport) = state.transport.take() {
            let mut transport = transport::lock(&transport);
            if transport.send_message(Message::Close).is_ok() {
                if let Err(e) = transport.flush() {
                    tracing::debug!(session = %self.id, "Failed to flush close: {}", e);
                }
            }
            transport.set_user_data(None);
            transport.close();
        }
        self.transition(&mut state, SessionStatus::Disconnected);
    }

    /// Send an unsequenced control message on the current transport
    pub fn send_message(&self, message: Message) -> Result<(), SessionError> {
        let state = self.lock_state();
        let transport = state.transport.as_ref().ok_or(SessionError::NoTransport)?;
        transport::lock(transport).send_message(message)?;
        Ok(())
    }

    /// Queue `payload` as the next sequenced packet and transmit it
    ///
    /// Without a transport the packet stays queued and goes out with the
    /// next [`resend_outstanding`](Self::resend_outstanding).
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<u16, SessionError> {
        let mut state = self.lock_state();
        let sequence = state.next_sequence;
        let packet = Packet::new(sequence, payload);

        self.packets().add_packet(packet.clone())?;
        state.next_sequence = next_sequence(sequence);

        if let Some(transport) = &state.transport {
            transport::lock(transport).send_message(Message::Data(packet))?;
        }
        Ok(sequence)
    }

    /// Peer acknowledged everything up to `sequence`
    pub fn on_ack(&self, sequence: u16) -> bool {
        self.packets().ack(sequence)
    }

    /// Peer reported `sequence` missing
    ///
    /// Resends that packet and everything queued after it, since the peer
    /// drops out-of-order data. Returns how many packets went out; an
    /// unknown sequence or a repeated nack for the same gap resends nothing.
    pub fn on_nack(&self, sequence: u16) -> Result<usize, SessionError> {
        let state = self.lock_state();
        let mut packets = self.packets();
        let resend: Vec<Packet> = packets.from_sequence(sequence).cloned().collect();

        if resend.is_empty() {
            tracing::debug!(session = %self.id, sequence, "Nack for unknown packet");
            return Ok(0);
        }
        if !packets.record_nack(sequence) {
            tracing::debug!(session = %self.id, sequence, "Gap already resent");
            return Ok(0);
        }
        drop(packets);

        let transport = state.transport.as_ref().ok_or(SessionError::NoTransport)?;
        let mut transport = transport::lock(transport);
        for packet in &resend {
            transport.send_message(Message::Data(packet.clone()))?;
        }
        Ok(resend.len())
    }

    /// Retransmit every unacknowledged packet
    pub fn resend_outstanding(&self) -> Result<usize, SessionError> {
        let state = self.lock_state();
        let transport = state.transport.as_ref().ok_or(SessionError::NoTransport)?;
        let outstanding: Vec<Packet> = self.packets().iter().cloned().collect();

        let mut transport = transport::lock(transport);
        for packet in &outstanding {
            transport.send_message(Message::Data(packet.clone()))?;
        }
        Ok(outstanding.len())
    }

    /// Accept an inbound data packet
    ///
    /// In-order packets are acknowledged and returned for delivery,
    /// duplicates are re-acknowledged, and a gap is answered with one nack
    /// for the first missing sequence.
    pub fn receive(&self, packet: Packet) -> Delivery {
        let mut state = self.lock_state();
        let sequence = packet.sequence();
        let last_delivered = state.last_delivered;
        let expected = last_delivered.map(next_sequence).unwrap_or(0);

        let (delivery, reply) = match last_delivered {
            Some(last) if is_less_than_or_equal(sequence, last) => {
                (Delivery::Duplicate, Some(Message::Ack(last)))
            }
            _ if sequence == expected => {
                state.last_delivered = Some(sequence);
                state.pending_nack = None;
                (Delivery::Delivered(packet), Some(Message::Ack(sequence)))
            }
            _ => {
                let fresh = state.pending_nack != Some(expected);
                state.pending_nack = Some(expected);
                let reply = fresh.then_some(Message::Nack(expected));
                (Delivery::OutOfOrder { missing: expected }, reply)
            }
        };

        if let (Some(reply), Some(transport)) = (reply, &state.transport) {
            if let Err(e) = transport::lock(transport).send_message(reply) {
                tracing::debug!(session = %self.id, "Failed to answer packet {}: {}", sequence, e);
            }
        }
        delivery
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("auth_id", &self.auth_id)
            .field("status", &state.status)
            .field("has_transport", &state.transport.is_some())
            .field("last_delivered", &state.last_delivered)
            .field("pending_nack", &state.pending_nack)
            .field("next_sequence", &state.next_sequence)
            .finish()
    }
}
