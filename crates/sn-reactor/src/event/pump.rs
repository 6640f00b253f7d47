//! Batched event draining

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sn_core::config::PumpConfig;

use super::{Event, EventQueue};

/// Application-side consumer of events
pub trait EventHandler: Send {
    fn handle_event(&mut self, event: Event);
}

impl<F> EventHandler for F
where
    F: FnMut(Event) + Send,
{
    fn handle_event(&mut self, event: Event) {
        self(event)
    }
}

/// Drains one queue into one handler, a batch at a time
pub struct EventPump<H> {
    queue: Arc<EventQueue>,
    handler: H,
    batch_size: usize,
}

impl<H: EventHandler> EventPump<H> {
    pub fn new(queue: Arc<EventQueue>, handler: H, batch_size: usize) -> Self {
        Self {
            queue,
            handler,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(queue: Arc<EventQueue>, handler: H, config: &PumpConfig) -> Self {
        Self::new(queue, handler, config.batch_size)
    }

    /// Dispatch at most one batch; never blocks
    pub fn refresh(&mut self) -> usize {
        let batch = self.queue.drain(self.batch_size);
        self.dispatch(batch)
    }

    /// Dispatch at most one batch, waiting up to `timeout` for it to start
    pub fn refresh_timeout(&mut self, timeout: Duration) -> usize {
        let batch = self.queue.drain_timeout(self.batch_size, timeout);
        self.dispatch(batch)
    }

    fn dispatch(&mut self, batch: Vec<Event>) -> usize {
        let count = batch.len();
        for event in batch {
            tracing::trace!(kind = %event.kind(), "Dispatching event");
            self.handler.handle_event(event);
        }
        count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

/// Anything that can be refreshed by [`run_cooperative`]
pub trait Refresh {
    /// Process pending work; returns how many items were handled
    fn refresh(&mut self) -> usize;
}

impl<H: EventHandler> Refresh for EventPump<H> {
    fn refresh(&mut self) -> usize {
        EventPump::refresh(self)
    }
}

/// Round-robin several pumps on the calling thread until `running` clears
///
/// Sleeps for `idle` whenever a full pass found nothing to do.
pub fn run_cooperative(pumps: &mut [&mut dyn Refresh], running: &AtomicBool, idle: Duration) {
    while running.load(Ordering::Acquire) {
        let handled: usize = pumps.iter_mut().map(|pump| pump.refresh()).sum();
        if handled == 0 {
            thread::sleep(idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Token;

    fn accept_possible(n: usize) -> Event {
        Event::AcceptPossible {
            listener: Token(n),
        }
    }

    fn token(event: &Event) -> usize {
        match event {
            Event::AcceptPossible { listener } => listener.0,
            _ => usize::MAX,
        }
    }

    #[test]
    fn test_refresh_dispatches_batches_in_order() {
        let queue = Arc::new(EventQueue::new());
        for n in 1..=3 {
            queue.push(accept_possible(n)).unwrap();
        }

        let mut seen = Vec::new();
        {
            let mut pump = EventPump::new(Arc::clone(&queue), |e: Event| seen.push(token(&e)), 2);
            assert_eq!(pump.refresh(), 2);
            assert_eq!(pump.refresh(), 1);
            assert_eq!(pump.refresh(), 0);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let pump = EventPump::new(Arc::new(EventQueue::new()), |_: Event| {}, 0);
        assert_eq!(pump.batch_size(), 1);
    }

    struct Collect(Vec<usize>);

    impl EventHandler for Collect {
        fn handle_event(&mut self, event: Event) {
            self.0.push(token(&event));
        }
    }

    #[test]
    fn test_run_cooperative_serves_every_pump() {
        let first = Arc::new(EventQueue::new());
        let second = Arc::new(EventQueue::new());
        first.push(accept_possible(1)).unwrap();
        second.push(accept_possible(2)).unwrap();
        second.push(accept_possible(3)).unwrap();

        let running = AtomicBool::new(true);
        let mut a = EventPump::new(Arc::clone(&first), Collect(Vec::new()), 1);
        let mut b = EventPump::new(Arc::clone(&second), Collect(Vec::new()), 1);

        // A third pump flips the flag once the others are drained
        let mut stopper = EventPump::new(Arc::new(EventQueue::new()), |_: Event| {}, 1);
        struct StopWhenDrained<'a> {
            queues: [&'a EventQueue; 2],
            running: &'a AtomicBool,
        }
        impl Refresh for StopWhenDrained<'_> {
            fn refresh(&mut self) -> usize {
                if self.queues.iter().all(|q| q.is_empty()) {
                    self.running.store(false, Ordering::Release);
                }
                0
            }
        }
        let mut stop = StopWhenDrained {
            queues: [&first, &second],
            running: &running,
        };

        run_cooperative(
            &mut [&mut a, &mut b, &mut stopper, &mut stop],
            &running,
            Duration::from_millis(1),
        );

        assert_eq!(a.into_handler().0, vec![1]);
        assert_eq!(b.into_handler().0, vec![2, 3]);
    }
}
