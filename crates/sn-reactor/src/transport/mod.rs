//! Channel transports and the select handlers that drive them

mod acceptor;
mod channel;
mod connector;
mod dispatcher;

pub use acceptor::Acceptor;
pub use channel::{lock, ChannelTransport, ReadOutcome, SharedTransport};
pub use connector::Connector;
pub use dispatcher::ChannelDispatcher;
