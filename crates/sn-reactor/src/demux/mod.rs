//! Readiness demultiplexing
//!
//! One [`Demultiplexer`] owns one OS readiness primitive and one thread.
//! Channels are registered with an interest set, a [`SelectHandler`] and
//! optional user data; the handler runs on the reactor thread for every
//! readiness edge.

mod demultiplexer;
mod key;

pub use demultiplexer::{Demultiplexer, ReactorState};
pub use key::{Attachment, Readiness, SelectHandler, Selectable, SelectionKey};
