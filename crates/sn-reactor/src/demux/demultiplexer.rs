//! Single-threaded readiness demultiplexer
//!
//! The [`Demultiplexer`] owns one `mio::Poll` and the dedicated thread that
//! waits on it. Registration may happen from any thread: it takes the
//! shared lock, nudges the waiting thread through a `Waker`, and registers
//! through a cloned `Registry`.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted --startup()--> Running --shutdown()--> Stopping --> Stopped
//!     ^                                                            |
//!     +------------------------- startup() -----------------------+
//! ```
//!
//! Shutdown is cooperative: the running flag is cleared, the waker fires,
//! and the caller waits on a condition variable until the loop thread has
//! dropped the poll instance.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Events, Interest, Poll, Registry, Token, Waker};

use sn_core::config::ReactorConfig;
use sn_core::error::ReactorError;

use super::key::{Attachment, Readiness, SelectHandler, Selectable, SelectionKey};
use crate::monitor::{ReactorMonitor, TracingMonitor};

/// Token reserved for the shutdown/registration waker
const WAKE_TOKEN: Token = Token(0);

/// First token handed out to registrations
const FIRST_TOKEN: usize = 1;

/// Lifecycle of the reactor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Created (or restarting) and the loop thread is not up yet
    NotStarted,
    /// The loop thread is waiting for readiness
    Running,
    /// Shutdown requested, the loop thread has not exited yet
    Stopping,
    /// The loop thread exited and the poll instance is gone
    Stopped,
}

/// One registered channel
pub(crate) struct Registration {
    pub(crate) interest: Interest,
    pub(crate) handler: Arc<dyn SelectHandler>,
    pub(crate) user_data: Option<Attachment>,
}

/// State guarded by the demultiplexer lock
pub(crate) struct Inner {
    pub(crate) state: ReactorState,
    pub(crate) registry: Option<Registry>,
    pub(crate) registrations: HashMap<Token, Registration>,
    waker: Option<Waker>,
    next_token: usize,
    timeout: Duration,
    shutdown_timeout: Duration,
    events_capacity: usize,
    thread: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    pub(crate) monitor: Arc<dyn ReactorMonitor>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Readiness demultiplexer with a dedicated wait thread
///
/// Cloning yields another handle to the same reactor.
#[derive(Clone)]
pub struct Demultiplexer {
    shared: Arc<Shared>,
}

impl Demultiplexer {
    /// Create an idle demultiplexer that reports through `tracing`
    pub fn new(config: &ReactorConfig) -> Self {
        Self::with_monitor(config, Arc::new(TracingMonitor))
    }

    /// Create an idle demultiplexer with a custom monitor
    pub fn with_monitor(config: &ReactorConfig, monitor: Arc<dyn ReactorMonitor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ReactorState::NotStarted,
                    registry: None,
                    registrations: HashMap::new(),
                    waker: None,
                    next_token: FIRST_TOKEN,
                    timeout: config.select_timeout,
                    shutdown_timeout: config.shutdown_timeout,
                    events_capacity: config.events_capacity.max(1),
                    thread: None,
                }),
                state_changed: Condvar::new(),
                monitor,
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReactorState {
        self.shared.lock().state
    }

    /// Whether the loop thread is running
    pub fn is_running(&self) -> bool {
        self.state() == ReactorState::Running
    }

    /// Upper bound of one readiness wait
    pub fn timeout(&self) -> Duration {
        self.shared.lock().timeout
    }

    /// Change the wait bound; takes effect from the next wait
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.lock().timeout = timeout;
    }

    /// Monitor receiving this reactor's callbacks
    pub fn monitor(&self) -> Arc<dyn ReactorMonitor> {
        Arc::clone(&self.shared.monitor)
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.shared.lock().registrations.len()
    }

    /// Open the readiness primitive and start the loop thread
    ///
    /// Blocks until the loop reports itself running.
    pub fn startup(&self) -> Result<(), ReactorError> {
        let mut inner = self.shared.lock();
        if matches!(inner.state, ReactorState::Running | ReactorState::Stopping) {
            return Err(ReactorError::AlreadyRunning);
        }

        let poll = Poll::new().map_err(ReactorError::Startup)?;
        let registry = poll.registry().try_clone().map_err(ReactorError::Startup)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(ReactorError::Startup)?;

        // A previous run may have left a finished thread behind
        if let Some(stale) = inner.thread.take() {
            let _ = stale.join();
        }

        inner.state = ReactorState::NotStarted;
        inner.registry = Some(registry);
        inner.waker = Some(waker);
        // Tokens keep counting across runs so keys from an earlier run
        // never alias a registration made in this one.
        debug_assert!(inner.registrations.is_empty());

        let capacity = inner.events_capacity;
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("selnet-reactor".into())
            .spawn(move || run_loop(shared, poll, capacity));

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                inner.registry = None;
                inner.waker = None;
                inner.state = ReactorState::Stopped;
                return Err(ReactorError::Startup(e));
            }
        };
        inner.thread = Some(handle);

        let inner = self
            .shared
            .state_changed
            .wait_while(inner, |i| i.state == ReactorState::NotStarted)
            .unwrap_or_else(PoisonError::into_inner);

        if inner.state != ReactorState::Running {
            return Err(ReactorError::Startup(io::Error::new(
                io::ErrorKind::Other,
                "reactor thread exited during startup",
            )));
        }
        drop(inner);

        self.shared.monitor.startup();
        Ok(())
    }

    /// Register a channel for readiness notification
    ///
    /// Safe to call from any thread, including from inside a handler on the
    /// reactor thread. The waiting thread is woken so the new interest is
    /// honoured immediately rather than after the current timeout.
    pub fn register<S>(
        &self,
        channel: &mut S,
        interest: Interest,
        handler: Arc<dyn SelectHandler>,
        user_data: Option<Attachment>,
    ) -> Result<SelectionKey, ReactorError>
    where
        S: Selectable + ?Sized,
    {
        let source = channel.source().ok_or(ReactorError::ChannelAbsent)?;

        let mut inner = self.shared.lock();
        if inner.state != ReactorState::Running {
            return Err(ReactorError::NotRunning);
        }
        wake(&inner);

        let token = Token(inner.next_token);
        let registry = inner.registry.as_ref().ok_or(ReactorError::NotRunning)?;
        registry
            .register(source, token, interest)
            .map_err(ReactorError::Registration)?;

        inner.next_token += 1;
        inner.registrations.insert(
            token,
            Registration {
                interest,
                handler,
                user_data,
            },
        );

        tracing::trace!(token = token.0, ?interest, "Channel registered");
        Ok(SelectionKey::new(token, Arc::downgrade(&self.shared)))
    }

    /// Replace the registration behind an existing key
    pub fn reregister<S>(
        &self,
        key: &SelectionKey,
        channel: &mut S,
        interest: Interest,
        handler: Arc<dyn SelectHandler>,
        user_data: Option<Attachment>,
    ) -> Result<(), ReactorError>
    where
        S: Selectable + ?Sized,
    {
        let source = channel.source().ok_or(ReactorError::ChannelAbsent)?;
        let token = key.token();

        let previous = {
            let mut inner = self.shared.lock();
            if !inner.registrations.contains_key(&token) {
                return Err(ReactorError::KeyCancelled(token.0));
            }
            wake(&inner);

            let registry = inner.registry.as_ref().ok_or(ReactorError::NotRunning)?;
            registry
                .reregister(source, token, interest)
                .map_err(ReactorError::Registration)?;

            inner.registrations.insert(
                token,
                Registration {
                    interest,
                    handler,
                    user_data,
                },
            )
        };
        drop(previous);
        Ok(())
    }

    /// Interrupt a blocked wait without changing state
    pub fn wakeup(&self) {
        wake(&self.shared.lock());
    }

    /// Stop the loop thread and close the readiness primitive
    ///
    /// Idle or already stopped demultiplexers return immediately. Called from
    /// a handler on the reactor thread, this only requests the stop.
    pub fn shutdown(&self) -> Result<(), ReactorError> {
        let mut inner = self.shared.lock();
        if matches!(inner.state, ReactorState::NotStarted | ReactorState::Stopped) {
            return Ok(());
        }

        inner.state = ReactorState::Stopping;
        if let Some(waker) = inner.waker.take() {
            if let Err(e) = waker.wake() {
                self.shared.monitor.close_error(&e);
            }
        }
        inner.registry = None;

        let on_reactor_thread = inner
            .thread
            .as_ref()
            .map(|h| h.thread().id() == thread::current().id())
            .unwrap_or(false);
        if on_reactor_thread {
            return Ok(());
        }

        let timeout = inner.shutdown_timeout;
        let (mut inner, wait) = self
            .shared
            .state_changed
            .wait_timeout_while(inner, timeout, |i| i.state != ReactorState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);

        if wait.timed_out() {
            return Err(ReactorError::ShutdownTimedOut(timeout));
        }

        let handle = inner.thread.take();
        drop(inner);
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Reactor thread panicked");
            }
        }

        self.shared.monitor.shutdown();
        Ok(())
    }
}

impl fmt::Debug for Demultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Demultiplexer")
            .field("state", &inner.state)
            .field("registrations", &inner.registrations.len())
            .field("timeout", &inner.timeout)
            .finish()
    }
}

fn wake(inner: &Inner) {
    if let Some(waker) = &inner.waker {
        if let Err(e) = waker.wake() {
            tracing::debug!("Failed to wake reactor: {}", e);
        }
    }
}

/// Marks the reactor stopped however the loop thread exits
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let registrations = {
            let mut inner = self.0.lock();
            inner.state = ReactorState::Stopped;
            inner.registry = None;
            inner.waker = None;
            std::mem::take(&mut inner.registrations)
        };
        self.0.state_changed.notify_all();
        drop(registrations);
    }
}

fn run_loop(shared: Arc<Shared>, poll: Poll, capacity: usize) {
    let _guard = ExitGuard(Arc::clone(&shared));
    // Declared after the guard so the poll instance is gone before the
    // guard reports Stopped.
    let mut poll = poll;
    let mut events = Events::with_capacity(capacity);

    shared.lock().state = ReactorState::Running;
    shared.state_changed.notify_all();
    shared.monitor.enter_loop();

    loop {
        let timeout = {
            let inner = shared.lock();
            if inner.state != ReactorState::Running {
                break;
            }
            inner.timeout
        };

        shared.monitor.enter_select();
        let result = poll.poll(&mut events, Some(timeout));
        settle_wait(&shared, result, &mut events);

        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            dispatch(&shared, token, Readiness::from_event(event));
        }
    }

    shared.monitor.exit_loop();
}

/// Report a finished wait; a failed wait counts as an empty cycle
fn settle_wait(shared: &Shared, result: io::Result<()>, events: &mut Events) -> usize {
    if let Err(e) = result {
        shared.monitor.select_failed(&e);
        events.clear();
    }

    let ready = events.iter().count();
    shared.monitor.select_completed(ready);
    ready
}

fn dispatch(shared: &Arc<Shared>, token: Token, readiness: Readiness) {
    let target = {
        let inner = shared.lock();
        inner
            .registrations
            .get(&token)
            .map(|r| (Arc::clone(&r.handler), r.user_data.clone()))
    };

    match target {
        Some((handler, user_data)) => {
            shared.monitor.handle_event(token);
            let key = SelectionKey::new(token, Arc::downgrade(shared));
            handler.handle_event(&key, readiness, user_data.as_ref());
        }
        None => shared.monitor.invalid_attachment(token),
    }
}
