//! Thread-safe FIFO handoff between the reactor and pumps

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use sn_core::config::PumpConfig;

use super::Event;

/// A bounded queue refused an event
#[derive(Debug, Error)]
#[error("Event queue is full ({capacity} events)")]
pub struct QueueFull {
    /// The rejected event, handed back to the producer
    pub event: Event,
    pub capacity: usize,
}

/// FIFO of [`Event`]s shared by producers and pumps
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    available: Condvar,
    capacity: Option<usize>,
}

impl EventQueue {
    /// Unbounded queue
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity: None,
        }
    }

    /// Queue that rejects pushes beyond `capacity` events
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn from_config(config: &PumpConfig) -> Self {
        match config.queue_capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event
    pub fn push(&self, event: Event) -> Result<(), QueueFull> {
        let mut events = self.lock();
        if let Some(capacity) = self.capacity {
            if events.len() >= capacity {
                return Err(QueueFull { event, capacity });
            }
        }
        events.push_back(event);
        drop(events);

        self.available.notify_one();
        Ok(())
    }

    /// Append a failure event even when the queue is at capacity
    ///
    /// The transport behind a failure event is already closed, so this is
    /// the only notification its session will ever get.
    pub fn push_terminal(&self, event: Event) {
        self.lock().push_back(event);
        self.available.notify_one();
    }

    /// Remove up to `max` events from the front without blocking
    pub fn drain(&self, max: usize) -> Vec<Event> {
        let mut events = self.lock();
        let count = max.min(events.len());
        events.drain(..count).collect()
    }

    /// Like [`drain`](Self::drain), but wait up to `timeout` for the first event
    pub fn drain_timeout(&self, max: usize, timeout: Duration) -> Vec<Event> {
        let events = self.lock();
        let (mut events, _) = self
            .available
            .wait_timeout_while(events, timeout, |e| e.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let count = max.min(events.len());
        events.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Token;
    use std::sync::Arc;
    use std::thread;

    fn listener_token(event: &Event) -> usize {
        match event {
            Event::AcceptPossible { listener } => listener.0,
            other => panic!("unexpected event {:?}", other.kind()),
        }
    }

    fn accept_possible(n: usize) -> Event {
        Event::AcceptPossible {
            listener: Token(n),
        }
    }

    #[test]
    fn test_drain_in_batches_preserves_order() {
        let queue = EventQueue::new();
        for n in 1..=3 {
            queue.push(accept_possible(n)).unwrap();
        }

        let first: Vec<_> = queue.drain(2).iter().map(listener_token).collect();
        assert_eq!(first, vec![1, 2]);

        let second: Vec<_> = queue.drain(2).iter().map(listener_token).collect();
        assert_eq!(second, vec![3]);

        assert!(queue.drain(2).is_empty());
    }

    #[test]
    fn test_bounded_rejects_and_returns_event() {
        let queue = EventQueue::bounded(1);
        queue.push(accept_possible(1)).unwrap();

        let rejected = queue.push(accept_possible(2)).unwrap_err();
        assert_eq!(rejected.capacity, 1);
        assert_eq!(listener_token(&rejected.event), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_terminal_push_ignores_capacity() {
        let queue = EventQueue::bounded(1);
        queue.push(accept_possible(1)).unwrap();
        queue.push_terminal(accept_possible(2));

        assert_eq!(queue.len(), 2);
        let tokens: Vec<_> = queue.drain(4).iter().map(listener_token).collect();
        assert_eq!(tokens, vec![1, 2]);
    }

    #[test]
    fn test_from_config() {
        let bounded = EventQueue::from_config(&PumpConfig {
            queue_capacity: Some(16),
            ..PumpConfig::default()
        });
        assert_eq!(bounded.capacity(), Some(16));
        assert_eq!(EventQueue::from_config(&PumpConfig::default()).capacity(), None);
    }

    #[test]
    fn test_drain_timeout_wakes_on_push() {
        let queue = Arc::new(EventQueue::new());
        let producer = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(accept_possible(9)).unwrap();
        });

        let drained = queue.drain_timeout(4, Duration::from_secs(2));
        handle.join().unwrap();

        assert_eq!(drained.len(), 1);
        assert_eq!(listener_token(&drained[0]), 9);
    }

    #[test]
    fn test_drain_timeout_expires_empty() {
        let queue = EventQueue::new();
        assert!(queue.drain_timeout(4, Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn test_fifo_per_producer_across_threads() {
        let queue = Arc::new(EventQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..100 {
                        queue.push(accept_possible(p * 1000 + n)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let tokens: Vec<_> = queue.drain(usize::MAX).iter().map(listener_token).collect();
        assert_eq!(tokens.len(), 400);
        for p in 0..4 {
            let own: Vec<_> = tokens.iter().filter(|t| **t / 1000 == p).collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
