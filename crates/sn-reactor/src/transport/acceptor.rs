//! Listening socket that feeds accepted connections into the reactor

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mio::net::{TcpListener, TcpStream};
use mio::Interest;

use sn_core::config::TransportConfig;
use sn_core::error::TransportError;

use crate::demux::{Attachment, Demultiplexer, Readiness, SelectHandler, SelectionKey};
use crate::event::Event;

use super::channel::ChannelTransport;
use super::dispatcher::ChannelDispatcher;

/// A registered listener
///
/// Every accepted stream becomes a [`ChannelTransport`] registered with the
/// shared [`ChannelDispatcher`] and announced with [`Event::Accept`].
pub struct Acceptor {
    listener: Mutex<Option<TcpListener>>,
    key: Mutex<Option<SelectionKey>>,
    local_addr: SocketAddr,
    demux: Demultiplexer,
    dispatcher: Arc<ChannelDispatcher>,
    config: TransportConfig,
}

impl Acceptor {
    /// Bind `addr` and start accepting on `demux`
    pub fn bind(
        addr: SocketAddr,
        demux: &Demultiplexer,
        dispatcher: Arc<ChannelDispatcher>,
        config: &TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let acceptor = Arc::new(Self {
            listener: Mutex::new(Some(listener)),
            key: Mutex::new(None),
            local_addr,
            demux: demux.clone(),
            dispatcher,
            config: config.clone(),
        });

        let handler: Arc<dyn SelectHandler> = acceptor.clone();
        let key = {
            let mut listener = acceptor.lock_listener();
            demux.register(&mut *listener, Interest::READABLE, handler, None)?
        };
        *acceptor.key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);

        tracing::info!("Listening on {}", local_addr);
        Ok(acceptor)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; established transports are unaffected
    pub fn close(&self) {
        let key = self.key.lock().unwrap_or_else(PoisonError::into_inner).take();
        let mut listener = self.lock_listener();
        if let (Some(key), Some(socket)) = (key, listener.as_mut()) {
            key.cancel(socket);
        }
        if listener.take().is_some() {
            tracing::info!("Stopped listening on {}", self.local_addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_listener().is_none()
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accept_one(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        self.lock_listener().as_ref().map(TcpListener::accept)
    }

    fn adopt(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let transport = ChannelTransport::new(stream, &self.config).into_shared();
        let attachment: Attachment = transport.clone();
        let handler: Arc<dyn SelectHandler> = self.dispatcher.clone();

        // Announce while holding the transport so Accept precedes its reads
        let mut channel = super::lock(&transport);
        match channel.register(&self.demux, handler, Some(attachment)) {
            Ok(()) => {
                tracing::debug!(%peer, "Accepted connection");
                let accepted = Event::Accept {
                    transport: Arc::clone(&transport),
                };
                if let Err(full) = self.dispatcher.queue().push(accepted) {
                    tracing::warn!(%peer, "Event queue full ({} events), closing", full.capacity);
                    channel.close();
                }
            }
            Err(e) => {
                tracing::warn!(%peer, "Failed to register accepted connection: {}", e);
                channel.close();
            }
        }
    }
}

impl SelectHandler for Acceptor {
    fn handle_event(&self, key: &SelectionKey, readiness: Readiness, _user_data: Option<&Attachment>) {
        if !readiness.readable {
            return;
        }

        let possible = Event::AcceptPossible {
            listener: key.token(),
        };
        if let Err(full) = self.dispatcher.queue().push(possible) {
            tracing::trace!("Dropping accept notification, queue holds {}", full.capacity);
        }

        loop {
            match self.accept_one() {
                None => return,
                Some(Ok((stream, peer))) => self.adopt(stream, peer),
                Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => return,
                Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Some(Err(e)) => {
                    tracing::warn!("Accept failed on {}: {}", self.local_addr, e);
                    return;
                }
            }
        }
    }
}
