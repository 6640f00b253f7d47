//! Per-connection channel wrapper

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Interest;
use tokio_util::codec::Decoder;

use sn_core::config::TransportConfig;
use sn_core::error::{ReactorError, TransportError};
use sn_protocol::{FrameCodec, Message, ProtocolError};

use crate::demux::{Attachment, Demultiplexer, SelectHandler, SelectionKey};
use crate::monitor::ReactorMonitor;

/// Transport shared between the reactor thread, events and its session
pub type SharedTransport = Arc<Mutex<ChannelTransport>>;

/// Lock a shared transport, recovering from poisoning
pub fn lock(transport: &SharedTransport) -> MutexGuard<'_, ChannelTransport> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of draining the socket into the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket drained until it would block
    Data(usize),
    /// Peer closed its write half after `n` bytes
    Eof(usize),
    /// Receive buffer limit reached; the socket may hold more
    Overflow(usize),
}

impl ReadOutcome {
    /// Bytes appended to the receive buffer
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Data(n) | ReadOutcome::Eof(n) | ReadOutcome::Overflow(n) => *n,
        }
    }
}

/// A registered TCP channel with its buffers
///
/// The channel is always watched for reads; writes are watched only while
/// the transmit queue holds data, or while an outbound connect is pending.
pub struct ChannelTransport {
    channel: Option<TcpStream>,
    key: Option<SelectionKey>,
    receive: BytesMut,
    transmit: VecDeque<Bytes>,
    user_data: Option<Weak<dyn Any + Send + Sync>>,
    monitor: Option<Arc<dyn ReactorMonitor>>,
    receive_limit: usize,
    read_chunk: usize,
    connecting: bool,
    codec: FrameCodec,
}

impl ChannelTransport {
    /// Wrap an established stream
    pub fn new(stream: TcpStream, config: &TransportConfig) -> Self {
        Self {
            channel: Some(stream),
            key: None,
            receive: BytesMut::with_capacity(config.read_chunk_size),
            transmit: VecDeque::new(),
            user_data: None,
            monitor: None,
            receive_limit: config.receive_buffer_limit.max(1),
            read_chunk: config.read_chunk_size.max(1),
            connecting: false,
            codec: FrameCodec::new(),
        }
    }

    /// Wrap a stream whose non-blocking connect has not completed yet
    pub fn connecting(stream: TcpStream, config: &TransportConfig) -> Self {
        let mut transport = Self::new(stream, config);
        transport.connecting = true;
        transport
    }

    /// Move into the shared form used by events and sessions
    pub fn into_shared(self) -> SharedTransport {
        Arc::new(Mutex::new(self))
    }

    /// Register the channel with `demux` using the current [`select_ops`]
    ///
    /// [`select_ops`]: Self::select_ops
    pub fn register(
        &mut self,
        demux: &Demultiplexer,
        handler: Arc<dyn SelectHandler>,
        attachment: Option<Attachment>,
    ) -> Result<(), TransportError> {
        let interest = self.select_ops();
        let key = demux.register(&mut self.channel, interest, handler, attachment)?;
        self.key = Some(key);
        self.monitor = Some(demux.monitor());
        Ok(())
    }

    /// Interest set the reactor should watch for this channel
    pub fn select_ops(&self) -> Interest {
        if self.connecting || !self.transmit.is_empty() {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        }
    }

    /// Push [`select_ops`](Self::select_ops) to the reactor
    ///
    /// Unregistered or closed transports have nothing to update.
    pub fn sync_interest(&mut self) -> Result<(), TransportError> {
        let interest = self.select_ops();
        match (&self.key, self.channel.as_mut()) {
            (Some(key), Some(channel)) => match key.set_interest(channel, interest) {
                Ok(()) => Ok(()),
                // Reactor already stopped; nothing left to watch
                Err(ReactorError::NotRunning) => Ok(()),
                Err(e) => Err(e.into()),
            },
            _ => Ok(()),
        }
    }

    /// Force the reactor to report current readiness again
    pub fn rearm(&mut self) -> Result<(), TransportError> {
        match (&self.key, self.channel.as_mut()) {
            (Some(key), Some(channel)) => Ok(key.rearm(channel)?),
            _ => Ok(()),
        }
    }

    /// Queue bytes for transmission and watch for writability
    pub fn queue_send(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.channel.is_none() {
            return Err(TransportError::Closed);
        }
        if !data.is_empty() {
            self.transmit.push_back(data);
        }
        self.sync_interest()
    }

    /// Encode and queue one protocol message
    pub fn send_message(&mut self, message: Message) -> Result<(), TransportError> {
        let frame = FrameCodec::encode_to_vec(message)?;
        self.queue_send(frame.freeze())
    }

    /// Write queued data until the socket would block
    ///
    /// Returns the number of bytes written. A partial write leaves the
    /// remainder at the front of the queue.
    pub fn flush(&mut self) -> io::Result<usize> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;

        let mut written = 0;
        while let Some(front) = self.transmit.front_mut() {
            match channel.write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) if n == front.len() => {
                    written += n;
                    self.transmit.pop_front();
                }
                Ok(n) => {
                    written += n;
                    front.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Read from the socket into the receive buffer until it would block
    pub fn fill_receive_buffer(&mut self) -> io::Result<ReadOutcome> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;

        let mut total = 0;
        loop {
            let start = self.receive.len();
            let room = self.receive_limit.saturating_sub(start);
            if room == 0 {
                return Ok(ReadOutcome::Overflow(total));
            }

            self.receive.resize(start + room.min(self.read_chunk), 0);
            let result = channel.read(&mut self.receive[start..]);
            match result {
                Ok(0) => {
                    self.receive.truncate(start);
                    return Ok(ReadOutcome::Eof(total));
                }
                Ok(n) => {
                    self.receive.truncate(start + n);
                    total += n;
                }
                Err(e) => {
                    self.receive.truncate(start);
                    match e.kind() {
                        io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Data(total)),
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    /// Decode every complete frame in the receive buffer
    pub fn decode_messages(&mut self) -> Result<Vec<Message>, ProtocolError> {
        let mut messages = Vec::new();
        while let Some(message) = self.codec.decode(&mut self.receive)? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Bytes received and not yet consumed
    pub fn receive_buffer(&self) -> &BytesMut {
        &self.receive
    }

    pub fn receive_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.receive
    }

    /// Maximum bytes held in the receive buffer
    pub fn receive_limit(&self) -> usize {
        self.receive_limit
    }

    /// Number of queued transmit items
    pub fn transmit_len(&self) -> usize {
        self.transmit.len()
    }

    /// Total bytes waiting to be written
    pub fn transmit_bytes(&self) -> usize {
        self.transmit.iter().map(Bytes::len).sum()
    }

    /// The object this transport belongs to, if it is still alive
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_user_data(&mut self, user_data: Option<Weak<dyn Any + Send + Sync>>) {
        self.user_data = user_data;
    }

    /// Registration key, `None` once closed
    pub fn key(&self) -> Option<&SelectionKey> {
        self.key.as_ref()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    /// Check whether a pending connect completed
    ///
    /// Returns `Ok(false)` while the connect is still in progress.
    pub fn finish_connect(&mut self) -> io::Result<bool> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;

        if let Some(e) = channel.take_error()? {
            return Err(e);
        }
        match channel.peer_addr() {
            Ok(_) => {
                self.connecting = false;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Pending socket error, if any
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        match &self.channel {
            Some(channel) => channel.take_error(),
            None => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.channel.as_ref().and_then(|c| c.peer_addr().ok())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.as_ref().and_then(|c| c.local_addr().ok())
    }

    /// Cancel the registration and close the channel
    ///
    /// Safe to call repeatedly. Queued transmit data is discarded; received
    /// bytes stay available for decoding.
    pub fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };

        if let Some(key) = self.key.take() {
            key.cancel(&mut channel);
        }

        if let Err(e) = channel.shutdown(Shutdown::Both) {
            // The peer may have closed first
            if e.kind() == io::ErrorKind::NotConnected {
                tracing::trace!("Channel already closed by peer");
            } else if let Some(monitor) = &self.monitor {
                monitor.close_error(&e);
            } else {
                tracing::debug!("Error closing channel: {}", e);
            }
        }

        self.transmit.clear();
        self.connecting = false;
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("peer", &self.peer_addr())
            .field("key", &self.key)
            .field("received", &self.receive.len())
            .field("queued", &self.transmit.len())
            .field("connecting", &self.connecting)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}
