//! Selection keys, registrations and the handler seam

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Token};

use sn_core::error::ReactorError;

use super::demultiplexer::{Inner, Shared};

/// Opaque per-registration user data
pub type Attachment = Arc<dyn Any + Send + Sync>;

/// Callback invoked on the reactor thread for each ready key
///
/// Implementations must return quickly: every registered channel shares
/// the one reactor thread.
pub trait SelectHandler: Send + Sync {
    /// Handle readiness reported for `key`
    fn handle_event(&self, key: &SelectionKey, readiness: Readiness, user_data: Option<&Attachment>);
}

impl<F> SelectHandler for F
where
    F: Fn(&SelectionKey, Readiness, Option<&Attachment>) + Send + Sync,
{
    fn handle_event(&self, key: &SelectionKey, readiness: Readiness, user_data: Option<&Attachment>) {
        self(key, readiness, user_data)
    }
}

/// Something that can be handed to [`Demultiplexer::register`]
///
/// Returns `None` when there is no live channel, which `register` rejects.
/// `mio` sources are always in non-blocking mode.
///
/// [`Demultiplexer::register`]: super::Demultiplexer::register
pub trait Selectable {
    /// The underlying readiness source, if present
    fn source(&mut self) -> Option<&mut dyn Source>;
}

macro_rules! impl_selectable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Selectable for $ty {
                fn source(&mut self) -> Option<&mut dyn Source> {
                    Some(self)
                }
            }
        )*
    };
}

impl_selectable!(TcpStream, TcpListener, UdpSocket);

impl<T: Source> Selectable for Option<T> {
    fn source(&mut self) -> Option<&mut dyn Source> {
        self.as_mut().map(|s| s as &mut dyn Source)
    }
}

/// Readiness reported for one key in one wait cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Data (or a pending accept) can be read
    pub readable: bool,
    /// The channel accepts writes, or a pending connect finished
    pub writable: bool,
    /// The OS reported an error condition
    pub error: bool,
    /// The peer closed its write half
    pub read_closed: bool,
    /// Our write half is closed
    pub write_closed: bool,
}

impl Readiness {
    /// Capture the readiness flags of a `mio` event
    pub fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }

    /// Readable-only readiness
    pub fn readable() -> Self {
        Self {
            readable: true,
            ..Self::default()
        }
    }

    /// Writable-only readiness
    pub fn writable() -> Self {
        Self {
            writable: true,
            ..Self::default()
        }
    }
}

/// Handle to one registration inside a [`Demultiplexer`]
///
/// Keys are cheap to clone and do not keep the demultiplexer alive. Every
/// operation needs the channel itself because the OS primitive is keyed by
/// the underlying descriptor.
///
/// [`Demultiplexer`]: super::Demultiplexer
#[derive(Clone)]
pub struct SelectionKey {
    token: Token,
    shared: Weak<Shared>,
}

impl SelectionKey {
    pub(crate) fn new(token: Token, shared: Weak<Shared>) -> Self {
        Self { token, shared }
    }

    /// Token identifying this registration
    pub fn token(&self) -> Token {
        self.token
    }

    /// Whether the registration still exists on a running demultiplexer
    pub fn is_valid(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| {
                let inner = shared.lock();
                inner.registry.is_some() && inner.registrations.contains_key(&self.token)
            })
            .unwrap_or(false)
    }

    /// Interest set currently registered
    pub fn interest(&self) -> Option<Interest> {
        let shared = self.shared.upgrade()?;
        let inner = shared.lock();
        inner.registrations.get(&self.token).map(|r| r.interest)
    }

    /// Replace the interest set for this key
    ///
    /// Interest that includes `WRITABLE` is always re-armed so a write
    /// edge is reported for data queued after the previous one was consumed.
    pub fn set_interest(&self, source: &mut dyn Source, interest: Interest) -> Result<(), ReactorError> {
        let shared = self.shared.upgrade().ok_or(ReactorError::NotRunning)?;
        let mut guard = shared.lock();
        let Inner {
            registry,
            registrations,
            ..
        } = &mut *guard;

        let registry = registry.as_ref().ok_or(ReactorError::NotRunning)?;
        let registration = registrations
            .get_mut(&self.token)
            .ok_or(ReactorError::KeyCancelled(self.token.0))?;

        if registration.interest != interest || interest.is_writable() {
            registry
                .reregister(source, self.token, interest)
                .map_err(ReactorError::Registration)?;
            registration.interest = interest;
        }
        Ok(())
    }

    /// Re-register with the current interest so pending readiness is
    /// reported again on the next wait
    pub fn rearm(&self, source: &mut dyn Source) -> Result<(), ReactorError> {
        let shared = self.shared.upgrade().ok_or(ReactorError::NotRunning)?;
        let inner = shared.lock();
        let registry = inner.registry.as_ref().ok_or(ReactorError::NotRunning)?;
        let interest = inner
            .registrations
            .get(&self.token)
            .map(|r| r.interest)
            .ok_or(ReactorError::KeyCancelled(self.token.0))?;

        registry
            .reregister(source, self.token, interest)
            .map_err(ReactorError::Registration)
    }

    /// Remove this registration; safe to call repeatedly
    pub fn cancel(&self, source: &mut dyn Source) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let removed = {
            let mut inner = shared.lock();
            let removed = inner.registrations.remove(&self.token);
            if removed.is_some() {
                if let Some(registry) = &inner.registry {
                    if let Err(e) = registry.deregister(source) {
                        shared.monitor.close_error(&e);
                    }
                }
            }
            removed
        };

        // Handlers and attachments may hold the last reference to other
        // reactor state; drop them outside the lock.
        drop(removed);
    }
}

impl fmt::Debug for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionKey")
            .field("token", &self.token.0)
            .finish()
    }
}

impl PartialEq for SelectionKey {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token && Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for SelectionKey {}
