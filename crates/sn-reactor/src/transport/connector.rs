//! Non-blocking outbound connections

use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;

use sn_core::config::TransportConfig;
use sn_core::error::TransportError;

use crate::demux::{Attachment, Demultiplexer, SelectHandler};

use super::channel::{ChannelTransport, SharedTransport};
use super::dispatcher::ChannelDispatcher;

/// Opens outbound transports on a demultiplexer
///
/// Completion is reported asynchronously: `ConnectPossible` followed by
/// either `Connect` or `ConnectError`.
pub struct Connector {
    demux: Demultiplexer,
    dispatcher: Arc<ChannelDispatcher>,
    config: TransportConfig,
}

impl Connector {
    pub fn new(demux: &Demultiplexer, dispatcher: Arc<ChannelDispatcher>, config: &TransportConfig) -> Self {
        Self {
            demux: demux.clone(),
            dispatcher,
            config: config.clone(),
        }
    }

    /// Start connecting to `addr`
    pub fn connect(&self, addr: SocketAddr) -> Result<SharedTransport, TransportError> {
        let stream = TcpStream::connect(addr)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, "Failed to set TCP_NODELAY: {}", e);
        }

        let transport = ChannelTransport::connecting(stream, &self.config).into_shared();
        let attachment: Attachment = transport.clone();
        let handler: Arc<dyn SelectHandler> = self.dispatcher.clone();

        super::lock(&transport).register(&self.demux, handler, Some(attachment))?;

        tracing::debug!(%addr, "Connecting");
        Ok(transport)
    }
}
