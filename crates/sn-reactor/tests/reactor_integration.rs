//! Reactor integration tests
//!
//! Drives real localhost TCP connections through the demultiplexer,
//! the event pipeline and the session layer.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::Interest;

use sn_core::config::{ReactorConfig, TransportConfig};
use sn_core::error::ReactorError;
use sn_core::SessionStatus;
use sn_protocol::Packet;
use sn_reactor::demux::{Attachment, SelectHandler};
use sn_reactor::event::{run_cooperative, EventKind};
use sn_reactor::transport::lock;
use sn_reactor::{
    Acceptor, ChannelDispatcher, ChannelTransport, Connector, Demultiplexer, EventHandler,
    EventPump, EventQueue, NoopMonitor, PacketSink, ReactorState, Session, SessionManager,
    SessionRouter, SharedTransport,
};

const WAIT: Duration = Duration::from_secs(5);

fn reactor_config() -> ReactorConfig {
    ReactorConfig {
        select_timeout: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(2),
        events_capacity: 128,
    }
}

fn running_demux() -> Demultiplexer {
    let demux = Demultiplexer::with_monitor(&reactor_config(), Arc::new(NoopMonitor));
    demux.startup().unwrap();
    demux
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached within {:?}", WAIT);
        thread::sleep(Duration::from_millis(5));
    }
}

fn pump_until<H: EventHandler>(pump: &mut EventPump<H>, mut done: impl FnMut(&EventPump<H>) -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done(pump) {
        assert!(Instant::now() < deadline, "pump condition not reached within {:?}", WAIT);
        pump.refresh_timeout(Duration::from_millis(10));
    }
}

/// Accepted server-side stream plus the blocking client end
fn registered_transport(
    demux: &Demultiplexer,
    queue: &Arc<EventQueue>,
) -> (SharedTransport, std::net::TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (stream, _) = listener.accept().unwrap();
    stream.set_nonblocking(true).unwrap();

    let transport =
        ChannelTransport::new(mio::net::TcpStream::from_std(stream), &TransportConfig::default())
            .into_shared();
    let handler: Arc<dyn SelectHandler> = Arc::new(ChannelDispatcher::new(Arc::clone(queue)));
    let attachment: Attachment = transport.clone();
    lock(&transport)
        .register(demux, handler, Some(attachment))
        .unwrap();
    (transport, peer)
}

#[test]
fn test_reactor_restarts_within_bounded_time() {
    let config = reactor_config();
    let demux = Demultiplexer::with_monitor(&config, Arc::new(NoopMonitor));

    for _ in 0..3 {
        demux.startup().unwrap();
        assert_eq!(demux.state(), ReactorState::Running);

        let started = Instant::now();
        demux.shutdown().unwrap();
        assert!(started.elapsed() < config.select_timeout * 10);
        assert_eq!(demux.state(), ReactorState::Stopped);
    }
}

#[test]
fn test_register_absent_channel_registers_nothing() {
    let demux = running_demux();
    let handler: Arc<dyn SelectHandler> = Arc::new(ChannelDispatcher::new(Arc::new(EventQueue::new())));

    let mut absent: Option<mio::net::TcpStream> = None;
    let result = demux.register(&mut absent, Interest::READABLE, handler, None);

    assert!(matches!(result, Err(ReactorError::ChannelAbsent)));
    assert_eq!(demux.registration_count(), 0);
    demux.shutdown().unwrap();
}

#[test]
fn test_interest_follows_transmit_buffer() {
    let demux = running_demux();
    let queue = Arc::new(EventQueue::new());
    let (transport, mut peer) = registered_transport(&demux, &queue);

    let key = lock(&transport).key().cloned().unwrap();
    assert_eq!(key.interest(), Some(Interest::READABLE));

    {
        let mut channel = lock(&transport);
        channel.queue_send(Bytes::from_static(b"ping")).unwrap();
        let interest = key.interest().unwrap();
        assert!(interest.is_readable() && interest.is_writable());
    }

    // The reactor flushes on the write edge and drops WRITE again
    wait_until(|| lock(&transport).transmit_len() == 0);
    wait_until(|| key.interest() == Some(Interest::READABLE));

    let mut buf = [0u8; 4];
    peer.set_read_timeout(Some(WAIT)).unwrap();
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    demux.shutdown().unwrap();
}

#[test]
fn test_close_registered_transport_twice() {
    let demux = running_demux();
    let queue = Arc::new(EventQueue::new());
    let (transport, _peer) = registered_transport(&demux, &queue);
    let key = lock(&transport).key().cloned().unwrap();
    assert_eq!(demux.registration_count(), 1);

    lock(&transport).close();
    assert!(!key.is_valid());
    assert_eq!(demux.registration_count(), 0);

    lock(&transport).close();
    assert!(lock(&transport).is_closed());
    assert_eq!(demux.registration_count(), 0);

    demux.shutdown().unwrap();
}

#[test]
fn test_accept_and_connect_events() {
    let demux = running_demux();
    let server_queue = Arc::new(EventQueue::new());
    let client_queue = Arc::new(EventQueue::new());

    let acceptor = Acceptor::bind(
        "127.0.0.1:0".parse().unwrap(),
        &demux,
        Arc::new(ChannelDispatcher::new(Arc::clone(&server_queue))),
        &TransportConfig::default(),
    )
    .unwrap();
    let connector = Connector::new(
        &demux,
        Arc::new(ChannelDispatcher::new(Arc::clone(&client_queue))),
        &TransportConfig::default(),
    );
    let outbound = connector.connect(acceptor.local_addr()).unwrap();

    let mut server_kinds = Vec::new();
    let mut client_kinds = Vec::new();
    let mut accepted = None;
    let deadline = Instant::now() + WAIT;
    while (accepted.is_none() || !client_kinds.contains(&EventKind::Connect)) && Instant::now() < deadline {
        for event in server_queue.drain_timeout(8, Duration::from_millis(10)) {
            server_kinds.push(event.kind());
            if event.kind() == EventKind::Accept {
                accepted = event.transport().cloned();
            }
        }
        for event in client_queue.drain(8) {
            client_kinds.push(event.kind());
        }
    }

    assert_eq!(
        &server_kinds[..2],
        &[EventKind::AcceptPossible, EventKind::Accept]
    );
    assert_eq!(
        &client_kinds[..2],
        &[EventKind::ConnectPossible, EventKind::Connect]
    );
    assert!(!lock(&outbound).is_connecting());

    // Data written by the client surfaces as Readable on the server side
    lock(&outbound)
        .queue_send(Bytes::from_static(b"hello"))
        .unwrap();
    let accepted = accepted.unwrap();
    wait_until(|| lock(&accepted).receive_buffer().len() == 5);
    assert_eq!(&lock(&accepted).receive_buffer()[..], b"hello");

    // Closing the client is reported as ChannelClosed on the server
    lock(&outbound).close();
    let deadline = Instant::now() + WAIT;
    let mut closed = false;
    while !closed && Instant::now() < deadline {
        closed = server_queue
            .drain_timeout(8, Duration::from_millis(10))
            .iter()
            .any(|e| e.kind() == EventKind::ChannelClosed);
    }
    assert!(closed);

    acceptor.close();
    demux.shutdown().unwrap();
}

struct Echo;

impl PacketSink for Echo {
    fn deliver(&mut self, session: &Arc<Session>, packet: Packet) {
        session.send(packet.payload().clone()).unwrap();
    }
}

#[derive(Default)]
struct Collect {
    payloads: Vec<Bytes>,
    opened: usize,
}

impl PacketSink for Collect {
    fn deliver(&mut self, _session: &Arc<Session>, packet: Packet) {
        self.payloads.push(packet.payload().clone());
    }

    fn session_opened(&mut self, _session: &Arc<Session>) {
        self.opened += 1;
    }
}

/// Echo server pumping on its own thread
struct EchoServer {
    acceptor: Arc<Acceptor>,
    sessions: Arc<SessionManager>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EchoServer {
    fn start(demux: &Demultiplexer) -> Self {
        let queue = Arc::new(EventQueue::new());
        let acceptor = Acceptor::bind(
            "127.0.0.1:0".parse().unwrap(),
            demux,
            Arc::new(ChannelDispatcher::new(Arc::clone(&queue))),
            &TransportConfig::default(),
        )
        .unwrap();
        let sessions = Arc::new(SessionManager::new());
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let sessions = Arc::clone(&sessions);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut pump = EventPump::new(queue, SessionRouter::server(sessions, Echo), 16);
                run_cooperative(&mut [&mut pump], &running, Duration::from_millis(1));
            })
        };

        Self {
            acceptor,
            sessions,
            running,
            thread: Some(thread),
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.acceptor.close();
    }
}

#[test]
fn test_echo_session_round_trip_and_resume() {
    let demux = running_demux();
    let server = EchoServer::start(&demux);

    let queue = Arc::new(EventQueue::new());
    let connector = Connector::new(
        &demux,
        Arc::new(ChannelDispatcher::new(Arc::clone(&queue))),
        &TransportConfig::default(),
    );
    let sessions = Arc::new(SessionManager::new());
    let mut pump = EventPump::new(
        queue,
        SessionRouter::client(Arc::clone(&sessions), Collect::default()),
        16,
    );

    connector.connect(server.acceptor.local_addr()).unwrap();
    pump_until(&mut pump, |p| p.handler().sink().opened == 1);

    let session = sessions.list().pop().unwrap();
    assert_eq!(session.status(), SessionStatus::Established);
    assert_eq!(server.sessions.len(), 1);

    for message in ["alpha", "beta", "gamma"] {
        session.send(message.as_bytes()).unwrap();
    }
    pump_until(&mut pump, |p| p.handler().sink().payloads.len() == 3);
    assert_eq!(
        pump.handler().sink().payloads,
        vec![
            Bytes::from_static(b"alpha"),
            Bytes::from_static(b"beta"),
            Bytes::from_static(b"gamma"),
        ]
    );
    pump_until(&mut pump, |_| session.packets().is_empty());

    // Drop the connection without a close frame
    let id = session.id();
    session.mark_lost().unwrap();
    let remote = server.sessions.find_session(id).unwrap();
    wait_until(|| remote.status() == SessionStatus::Lost);

    // Queued while disconnected, delivered after resume
    session.send(&b"delta"[..]).unwrap();

    connector.connect(server.acceptor.local_addr()).unwrap();
    pump_until(&mut pump, |p| p.handler().sink().opened == 2);
    assert_eq!(sessions.len(), 1);
    assert_eq!(server.sessions.len(), 1);
    assert_eq!(remote.status(), SessionStatus::Established);

    pump_until(&mut pump, |p| p.handler().sink().payloads.len() == 4);
    assert_eq!(pump.handler().sink().payloads[3], Bytes::from_static(b"delta"));

    session.disconnect();
    wait_until(|| server.sessions.is_empty());

    drop(server);
    demux.shutdown().unwrap();
}
