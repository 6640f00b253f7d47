//! Select handler for established and connecting transports

use std::io;
use std::sync::{Arc, Mutex};

use crate::demux::{Attachment, Readiness, SelectHandler, SelectionKey};
use crate::event::{Event, EventQueue};

use super::channel::{lock, ChannelTransport, ReadOutcome, SharedTransport};

/// Turns readiness on a [`ChannelTransport`] into queued [`Event`]s
///
/// Reads and flushes happen here on the reactor thread so the socket is
/// drained on every edge; handlers only see buffered data.
pub struct ChannelDispatcher {
    queue: Arc<EventQueue>,
}

impl ChannelDispatcher {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Queue events for the pumps; failures bypass the capacity bound
    fn publish(&self, events: Vec<Event>) {
        for event in events {
            if event.is_failure() {
                self.queue.push_terminal(event);
            } else if let Err(full) = self.queue.push(event) {
                tracing::warn!(
                    kind = %full.event.kind(),
                    "Event queue full ({} events), dropping event",
                    full.capacity
                );
            }
        }
    }
}

impl SelectHandler for ChannelDispatcher {
    fn handle_event(&self, key: &SelectionKey, readiness: Readiness, user_data: Option<&Attachment>) {
        let transport: SharedTransport =
            match user_data.and_then(|d| Arc::clone(d).downcast::<Mutex<ChannelTransport>>().ok()) {
                Some(transport) => transport,
                None => {
                    tracing::warn!(token = key.token().0, "Ready key carries no transport");
                    return;
                }
            };

        let events = {
            let mut channel = lock(&transport);
            process(&transport, &mut channel, readiness)
        };
        self.publish(events);
    }
}

fn process(transport: &SharedTransport, channel: &mut ChannelTransport, readiness: Readiness) -> Vec<Event> {
    let mut events = Vec::new();
    if channel.is_closed() {
        return events;
    }

    if channel.is_connecting() {
        if !(readiness.writable || readiness.error || readiness.write_closed) {
            return events;
        }

        events.push(Event::ConnectPossible {
            transport: Arc::clone(transport),
        });
        match channel.finish_connect() {
            Ok(true) => {
                tracing::debug!(peer = ?channel.peer_addr(), "Connection established");
                events.push(Event::Connect {
                    transport: Arc::clone(transport),
                });
            }
            Ok(false) => return events,
            Err(error) => {
                channel.close();
                events.push(Event::ConnectError {
                    transport: Arc::clone(transport),
                    error,
                });
                return events;
            }
        }
    }

    if readiness.readable || readiness.read_closed {
        match channel.fill_receive_buffer() {
            Ok(outcome) => {
                let bytes = outcome.bytes();
                if bytes > 0 {
                    events.push(Event::Readable {
                        transport: Arc::clone(transport),
                        bytes,
                    });
                }
                match outcome {
                    ReadOutcome::Data(_) => {}
                    ReadOutcome::Overflow(_) => events.push(Event::BufferOverflow {
                        transport: Arc::clone(transport),
                        limit: channel.receive_limit(),
                    }),
                    ReadOutcome::Eof(_) => {
                        channel.close();
                        events.push(Event::ChannelClosed {
                            transport: Arc::clone(transport),
                        });
                        return events;
                    }
                }
            }
            Err(error) => {
                channel.close();
                events.push(Event::ReadError {
                    transport: Arc::clone(transport),
                    error,
                });
                return events;
            }
        }
    }

    if readiness.writable && channel.transmit_len() > 0 {
        match channel.flush() {
            Ok(0) => {}
            Ok(bytes) => events.push(Event::Writable {
                transport: Arc::clone(transport),
                bytes,
            }),
            Err(error) => {
                channel.close();
                events.push(Event::IoError {
                    transport: Arc::clone(transport),
                    error,
                });
                return events;
            }
        }
    }

    if readiness.error {
        let error = match channel.take_error() {
            Ok(Some(error)) => Some(error),
            Ok(None) => None,
            Err(error) => Some(error),
        };
        if let Some(error) = error {
            channel.close();
            events.push(Event::IoError {
                transport: Arc::clone(transport),
                error,
            });
            return events;
        }
    }

    if let Err(e) = channel.sync_interest() {
        tracing::warn!("Failed to update interest: {}", e);
        channel.close();
        events.push(Event::IoError {
            transport: Arc::clone(transport),
            error: io::Error::new(io::ErrorKind::Other, e.to_string()),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    use mio::Token;
    use crate::event::EventKind;
    use sn_core::config::TransportConfig;

    fn connected_pair() -> (SharedTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(server);
        let transport = ChannelTransport::new(stream, &TransportConfig::default()).into_shared();
        (transport, peer)
    }

    #[test]
    fn test_channel_closed_survives_full_queue() {
        let queue = Arc::new(EventQueue::bounded(1));
        queue.push(Event::AcceptPossible { listener: Token(7) }).unwrap();
        let dispatcher = ChannelDispatcher::new(Arc::clone(&queue));

        let (transport, peer) = connected_pair();
        drop(peer);

        // The peer's FIN may take a moment to show up on loopback
        let deadline = Instant::now() + Duration::from_secs(2);
        let events = loop {
            let events = process(&transport, &mut lock(&transport), Readiness::readable());
            if !events.is_empty() || Instant::now() >= deadline {
                break events;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        dispatcher.publish(events);

        assert!(lock(&transport).is_closed());
        let kinds: Vec<_> = queue.drain(4).iter().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::AcceptPossible, EventKind::ChannelClosed]);
    }

    #[test]
    fn test_ordinary_events_dropped_when_full() {
        let queue = Arc::new(EventQueue::bounded(1));
        queue.push(Event::AcceptPossible { listener: Token(7) }).unwrap();
        let dispatcher = ChannelDispatcher::new(Arc::clone(&queue));

        let (transport, mut peer) = connected_pair();
        peer.write_all(b"data").unwrap();
        dispatcher.publish(vec![Event::Readable { transport, bytes: 4 }]);

        assert_eq!(queue.len(), 1);
    }
}
