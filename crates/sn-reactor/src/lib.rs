//! sn-reactor: Readiness reactor with reliable sessions
//!
//! A single-threaded [`Demultiplexer`] watches TCP channels through `mio`.
//! Select handlers turn readiness into [`Event`]s on an [`EventQueue`];
//! [`EventPump`]s drain them on application threads. On top of that,
//! [`Session`]s give each peer an acknowledged, resumable packet stream.

pub mod demux;
pub mod event;
pub mod monitor;
pub mod session;
pub mod transport;

pub use demux::{Demultiplexer, ReactorState, Readiness, SelectHandler, SelectionKey};
pub use event::{Event, EventHandler, EventKind, EventPump, EventQueue};
pub use monitor::{NoopMonitor, ReactorMonitor, TracingMonitor};
pub use session::{PacketQueue, PacketSink, Session, SessionManager, SessionRouter};
pub use transport::{Acceptor, ChannelDispatcher, ChannelTransport, Connector, SharedTransport};
