//! Event handler that runs the session protocol over transports
//!
//! # Handshake
//!
//! ```text
//! client                          server
//!   | -- Hello(id|0, auth) ------> |   id 0: new session
//!   |                              |   otherwise: resume if auth matches
//!   | <------ Welcome(id, auth) -- |
//!   |        (both resend unacknowledged packets on resume)
//! ```
//!
//! After the handshake, Data/Ack/Nack frames go to the session attached
//! to the transport, and Close tears the session down on both ends.

use std::sync::Arc;

use sn_core::time::elapsed_duration;
use sn_protocol::{AuthId, Message, Packet, SessionId};

use super::manager::SessionManager;
use super::reliable::{Delivery, Session};
use crate::event::{Event, EventHandler};
use crate::transport::{self, ChannelTransport, SharedTransport};

/// Application callbacks for session traffic
pub trait PacketSink: Send {
    /// An in-order packet arrived
    fn deliver(&mut self, session: &Arc<Session>, packet: Packet);

    /// Handshake completed on a new or resumed session
    fn session_opened(&mut self, _session: &Arc<Session>) {}

    /// The transport under an established session failed
    fn session_lost(&mut self, _session: &Arc<Session>) {}

    /// The peer closed the session
    fn session_closed(&mut self, _session: &Arc<Session>) {}
}

/// Which side of the handshake this router plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

pub struct SessionRouter<S> {
    sessions: Arc<SessionManager>,
    role: Role,
    /// Credentials a client presents on its next connect
    resume: Option<(SessionId, AuthId)>,
    sink: S,
}

impl<S: PacketSink> SessionRouter<S> {
    pub fn server(sessions: Arc<SessionManager>, sink: S) -> Self {
        Self {
            sessions,
            role: Role::Server,
            resume: None,
            sink,
        }
    }

    pub fn client(sessions: Arc<SessionManager>, sink: S) -> Self {
        Self {
            sessions,
            role: Role::Client,
            resume: None,
            sink,
        }
    }

    /// Ask the server to resume an earlier session on the next connect
    pub fn resume_with(mut self, session_id: SessionId, auth_id: AuthId) -> Self {
        self.resume = Some((session_id, auth_id));
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn on_connect(&mut self, transport: &SharedTransport) {
        if self.role != Role::Client {
            return;
        }

        let (session_id, auth_id) = self
            .resume
            .unwrap_or((SessionId::UNASSIGNED, AuthId::new(0)));
        tracing::debug!(session = %session_id, "Sending hello");

        let hello = Message::Hello {
            session_id,
            auth_id,
        };
        if let Err(e) = transport::lock(transport).send_message(hello) {
            tracing::warn!("Failed to send hello: {}", e);
        }
    }

    fn on_input(&mut self, transport: &SharedTransport, overflowed: bool) {
        let (decoded, mut session, oversized) = {
            let mut channel = transport::lock(transport);
            let decoded = channel.decode_messages();
            let mut oversized = false;
            if overflowed && decoded.is_ok() {
                if channel.receive_buffer().len() >= channel.receive_limit() {
                    tracing::warn!(
                        peer = ?channel.peer_addr(),
                        "Frame exceeds receive buffer limit of {} bytes",
                        channel.receive_limit()
                    );
                    channel.close();
                    oversized = true;
                } else if let Err(e) = channel.rearm() {
                    tracing::debug!("Failed to re-arm after overflow: {}", e);
                }
            }
            (decoded, session_of(&channel), oversized)
        };

        // Closing emits no event of its own; unacked packets go out again
        // on resume.
        if oversized {
            self.on_failure(transport);
            return;
        }

        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Protocol error, dropping connection: {}", e);
                self.on_failure(transport);
                transport::lock(transport).close();
                return;
            }
        };

        for message in messages {
            session = self.route(transport, session, message);
            if transport::lock(transport).is_closed() && session.is_none() {
                break;
            }
        }
    }

    fn route(
        &mut self,
        transport: &SharedTransport,
        session: Option<Arc<Session>>,
        message: Message,
    ) -> Option<Arc<Session>> {
        match (message, session) {
            (
                Message::Hello {
                    session_id,
                    auth_id,
                },
                None,
            ) if self.role == Role::Server => self.accept_hello(transport, session_id, auth_id),
            (
                Message::Welcome {
                    session_id,
                    auth_id,
                },
                None,
            ) if self.role == Role::Client => self.accept_welcome(transport, session_id, auth_id),
            (message @ (Message::Hello { .. } | Message::Welcome { .. }), session) => {
                tracing::warn!(kind = ?message.kind(), "Unexpected handshake message");
                session
            }
            (Message::Close, None) => {
                // Server refused our resume; start fresh next time
                if self.role == Role::Client {
                    self.resume = None;
                }
                transport::lock(transport).close();
                None
            }
            (message, None) => {
                tracing::warn!(kind = ?message.kind(), "Message before handshake, closing");
                transport::lock(transport).close();
                None
            }
            (Message::Data(packet), Some(session)) => {
                match session.receive(packet) {
                    Delivery::Delivered(packet) => self.sink.deliver(&session, packet),
                    Delivery::Duplicate => {
                        tracing::trace!(session = %session.id(), "Duplicate packet");
                    }
                    Delivery::OutOfOrder { missing } => {
                        tracing::debug!(session = %session.id(), missing, "Gap in packet sequence");
                    }
                }
                Some(session)
            }
            (Message::Ack(sequence), Some(session)) => {
                if !session.on_ack(sequence) {
                    tracing::trace!(session = %session.id(), sequence, "Stale ack");
                }
                Some(session)
            }
            (Message::Nack(sequence), Some(session)) => {
                if let Err(e) = session.on_nack(sequence) {
                    tracing::warn!(session = %session.id(), "Failed to retransmit: {}", e);
                }
                Some(session)
            }
            (Message::Close, Some(session)) => {
                tracing::info!(session = %session.id(), "Session closed by peer");
                session.disconnect();
                if self.role == Role::Server {
                    self.sessions.delete_session(&session);
                } else {
                    self.resume = None;
                }
                self.sink.session_closed(&session);
                None
            }
        }
    }

    fn accept_hello(
        &mut self,
        transport: &SharedTransport,
        session_id: SessionId,
        auth_id: AuthId,
    ) -> Option<Arc<Session>> {
        let resumed = !session_id.is_unassigned();
        let session = if resumed {
            match self.sessions.authenticate(session_id, auth_id) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Rejecting resume: {}", e);
                    reject(transport);
                    return None;
                }
            }
        } else {
            self.sessions.new_session()
        };

        session.set_transport(Arc::clone(transport));
        let welcome = Message::Welcome {
            session_id: session.id(),
            auth_id: session.auth_id(),
        };
        if let Err(e) = session.send_message(welcome) {
            tracing::warn!(session = %session.id(), "Failed to send welcome: {}", e);
        }

        self.open(&session, resumed);
        Some(session)
    }

    fn accept_welcome(
        &mut self,
        transport: &SharedTransport,
        session_id: SessionId,
        auth_id: AuthId,
    ) -> Option<Arc<Session>> {
        let session = self.sessions.adopt(session_id, auth_id);
        if session.auth_id() != auth_id {
            tracing::warn!(session = %session_id, "Welcome does not match known session");
            reject(transport);
            return None;
        }

        let resumed = self.resume.map(|(id, _)| id == session_id).unwrap_or(false);
        self.resume = Some((session_id, auth_id));

        session.set_transport(Arc::clone(transport));
        self.open(&session, resumed);
        Some(session)
    }

    fn open(&mut self, session: &Arc<Session>, resumed: bool) {
        if let Err(e) = session.establish() {
            tracing::warn!(session = %session.id(), "Failed to establish: {}", e);
            return;
        }

        if resumed {
            match session.resend_outstanding() {
                Ok(0) => {}
                Ok(count) => tracing::debug!(session = %session.id(), count, "Resent outstanding packets"),
                Err(e) => tracing::warn!(session = %session.id(), "Resend after resume failed: {}", e),
            }
        }

        tracing::info!(session = %session.id(), resumed, "Session established");
        self.sink.session_opened(session);
    }

    fn on_failure(&mut self, transport: &SharedTransport) {
        let session = session_of(&transport::lock(transport));
        let Some(session) = session else {
            return;
        };

        let up_for = elapsed_duration(session.time_of_last_status_change());
        match session.mark_lost() {
            Ok(()) => {
                tracing::info!(session = %session.id(), ?up_for, "Session lost");
                self.sink.session_lost(&session);
            }
            Err(e) => tracing::debug!(session = %session.id(), "Not marking lost: {}", e),
        }
    }
}

impl<S: PacketSink> EventHandler for SessionRouter<S> {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accept { transport } => {
                tracing::debug!(peer = ?transport::lock(&transport).peer_addr(), "Connection accepted");
            }
            Event::Connect { transport } => self.on_connect(&transport),
            Event::Readable { transport, .. } => self.on_input(&transport, false),
            Event::BufferOverflow { transport, .. } => self.on_input(&transport, true),
            Event::ChannelClosed { transport } => {
                tracing::debug!("Channel closed by peer");
                self.on_failure(&transport);
            }
            Event::IoError { transport, error }
            | Event::ReadError { transport, error }
            | Event::ConnectError { transport, error } => {
                tracing::debug!("Transport failed: {}", error);
                self.on_failure(&transport);
            }
            Event::AcceptPossible { .. } | Event::ConnectPossible { .. } | Event::Writable { .. } => {}
        }
    }
}

fn session_of(channel: &ChannelTransport) -> Option<Arc<Session>> {
    channel.user_data()?.downcast::<Session>().ok()
}

fn reject(transport: &SharedTransport) {
    let mut channel = transport::lock(transport);
    if channel.send_message(Message::Close).is_ok() {
        let _ = channel.flush();
    }
    channel.close();
}
