//! Reliable sessions over replaceable transports
//!
//! A [`Session`] owns at most one transport and the queue of packets the
//! peer has not acknowledged yet. The [`SessionManager`] allocates and
//! indexes sessions; the [`SessionRouter`] drives them from reactor events.

mod manager;
mod packet_queue;
mod reliable;
mod router;

pub use manager::SessionManager;
pub use packet_queue::{is_less_than_or_equal, PacketQueue};
pub use reliable::{Delivery, Session};
pub use router::{PacketSink, Role, SessionRouter};
