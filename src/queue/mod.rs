//! Bounded lock-free queue for handing values across threads.
//!
//! A [`Queue`] is a fixed-capacity ring of opaque values paired with two
//! [`Notifier`]s, one raised whenever a value is pushed ("became non-empty")
//! and one whenever a value is popped ("became non-full"). A pump manager on
//! either side watches those descriptors through the [`QueueWatch`] trait,
//! so a consumer loop wakes up without polling.
//!
//! # Design
//!
//! - A lock-free SPSC ring for the data: the producer writes a slot and then
//!   publishes it by advancing `tail` with Release ordering; the consumer
//!   acquires `tail`, reads the slot and advances `head`.
//! - [`Sharing`] decides how each side is guarded. A single side is
//!   wait-free and only checks that it is not entered twice concurrently;
//!   a shared side is serialized behind a mutex, keeping the ring's
//!   one-writer-per-index property.
//! - Notifications may be spurious; a genuine transition is never missed,
//!   since every successful push/pop raises the matching notifier.
//!
//! # Example
//!
//! ```rust
//! use pipeflow::queue::{Queue, QueueConfig};
//!
//! let queue = Queue::new(QueueConfig::with_capacity(2)).unwrap();
//! assert!(queue.push(1).is_ok());
//! assert!(queue.push(2).is_ok());
//! assert_eq!(queue.push(3), Err(3));
//! assert_eq!(queue.pop(), Some(1));
//! ```

mod notifier;
mod ring;

pub use notifier::Notifier;

use crate::error::{Error, Result};
use ring::RingBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Configuration
// ============================================================================

/// How many threads may operate each side of a queue concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sharing {
    /// One producer, one consumer. Lock-free and wait-free.
    #[default]
    Single,
    /// Producers are serialized behind a mutex.
    MultiProducer,
    /// Consumers are serialized behind a mutex.
    MultiConsumer,
    /// Both sides are serialized.
    Multi,
}

impl Sharing {
    fn shared_producers(self) -> bool {
        matches!(self, Sharing::MultiProducer | Sharing::Multi)
    }

    fn shared_consumers(self) -> bool {
        matches!(self, Sharing::MultiConsumer | Sharing::Multi)
    }
}

/// Configuration for a [`Queue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of values held at once. Must be non-zero.
    ///
    /// Powers of two waste no slots. Default is 16.
    pub capacity: usize,

    /// Name for debugging/logging purposes.
    pub name: String,

    /// Concurrency arity of each side.
    pub sharing: Sharing,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            name: String::from("queue"),
            sharing: Sharing::Single,
        }
    }
}

impl QueueConfig {
    /// Create a new config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set the queue name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the sharing mode.
    pub fn with_sharing(mut self, sharing: Sharing) -> Self {
        self.sharing = sharing;
        self
    }
}

// ============================================================================
// Side guards
// ============================================================================

/// Guards one side (producer or consumer) of the ring.
enum SideGuard {
    Exclusive(AtomicBool),
    Locked(Mutex<()>),
}

enum SideToken<'a> {
    Exclusive(&'a AtomicBool),
    Locked(#[allow(dead_code)] MutexGuard<'a, ()>),
}

impl SideGuard {
    fn new(shared: bool) -> Self {
        if shared {
            Self::Locked(Mutex::new(()))
        } else {
            Self::Exclusive(AtomicBool::new(false))
        }
    }

    fn enter(&self, side: &'static str, name: &str) -> SideToken<'_> {
        match self {
            Self::Exclusive(busy) => {
                if busy.swap(true, Ordering::Acquire) {
                    panic!(
                        "queue '{}': concurrent {} on a single-{} queue",
                        name, side, side
                    );
                }
                SideToken::Exclusive(busy)
            }
            Self::Locked(lock) => {
                SideToken::Locked(lock.lock().unwrap_or_else(PoisonError::into_inner))
            }
        }
    }
}

impl Drop for SideToken<'_> {
    fn drop(&mut self) {
        if let SideToken::Exclusive(busy) = self {
            busy.store(false, Ordering::Release);
        }
    }
}

// ============================================================================
// Readiness surface
// ============================================================================

/// Which queue transition a watcher is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The queue holds at least one value.
    Pop,
    /// The queue has room for at least one value.
    Push,
}

/// Object-safe readiness surface of a queue, as seen by a pump manager.
pub trait QueueWatch: Send + Sync {
    /// Queue name, for logging.
    fn name(&self) -> &str;

    /// The notifier raised on transitions in `direction`.
    fn notifier(&self, direction: Direction) -> &Notifier;

    /// Whether the queue is currently ready in `direction`.
    fn is_ready(&self, direction: Direction) -> bool;
}

// ============================================================================
// Queue
// ============================================================================

/// A bounded FIFO of `T` that is safe to push on one thread and pop on
/// another.
pub struct Queue<T> {
    ring: RingBuffer<T>,
    producer: SideGuard,
    consumer: SideGuard,

    /// Raised after each push.
    readable: Notifier,

    /// Raised after each pop.
    writable: Notifier,

    config: QueueConfig,
}

impl<T> Queue<T> {
    /// Create a new queue with the given configuration.
    pub fn new(config: QueueConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::invalid("queue capacity must be non-zero"));
        }

        tracing::debug!(
            "queue '{}': capacity {}, {:?}",
            config.name,
            config.capacity,
            config.sharing
        );

        Ok(Self {
            ring: RingBuffer::new(config.capacity),
            producer: SideGuard::new(config.sharing.shared_producers()),
            consumer: SideGuard::new(config.sharing.shared_consumers()),
            readable: Notifier::new()?,
            writable: Notifier::new()?,
            config,
        })
    }

    /// Create a single-producer single-consumer queue of `capacity`.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(QueueConfig::with_capacity(capacity))
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Get the sharing mode.
    pub fn sharing(&self) -> Sharing {
        self.config.sharing
    }

    /// Get the number of values currently held.
    ///
    /// Only a snapshot when the other side is active on another thread.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the queue is full.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Push a value.
    ///
    /// Returns `Err(value)` if the queue is full; the value is not stored.
    ///
    /// # Panics
    ///
    /// Panics if two threads push concurrently on a queue whose producer
    /// side is not shared.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let token = self.producer.enter("push", &self.config.name);
        // SAFETY: the side token excludes any other producer.
        let pushed = unsafe { self.ring.push(value) };
        drop(token);

        pushed.map(|_| {
            if let Err(e) = self.readable.notify() {
                tracing::warn!("queue '{}': readable notify failed: {}", self.name(), e);
            }
        })
    }

    /// Pop the oldest value, or `None` if the queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if two threads pop concurrently on a queue whose consumer
    /// side is not shared.
    pub fn pop(&self) -> Option<T> {
        let token = self.consumer.enter("pop", &self.config.name);
        // SAFETY: the side token excludes any other consumer.
        let popped = unsafe { self.ring.pop() };
        drop(token);

        popped.map(|(value, _)| {
            if let Err(e) = self.writable.notify() {
                tracing::warn!("queue '{}': writable notify failed: {}", self.name(), e);
            }
            value
        })
    }

    /// Clone the oldest value without removing it.
    ///
    /// Lets a consumer offer the value downstream and pop it only once it
    /// has been accepted, keeping order when the offer is refused.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let _token = self.consumer.enter("peek", &self.config.name);
        // SAFETY: the side token excludes any other consumer.
        unsafe { self.ring.peek() }
    }

    /// Pop every value currently held, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len());
        while let Some(value) = self.pop() {
            values.push(value);
        }
        values
    }

    /// Check that the queue is empty before it is released.
    ///
    /// Draining is the caller's responsibility: a queue still holding values
    /// is reported rather than silently emptied.
    pub fn clean(&self) -> Result<()> {
        match self.len() {
            0 => Ok(()),
            n => Err(Error::QueueNotEmpty(n)),
        }
    }

    /// The notifier raised after each push.
    pub fn readable(&self) -> &Notifier {
        &self.readable
    }

    /// The notifier raised after each pop.
    pub fn writable(&self) -> &Notifier {
        &self.writable
    }
}

impl<T: Send> QueueWatch for Queue<T> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn notifier(&self, direction: Direction) -> &Notifier {
        match direction {
            Direction::Pop => &self.readable,
            Direction::Push => &self.writable,
        }
    }

    fn is_ready(&self, direction: Direction) -> bool {
        match direction {
            Direction::Pop => !self.is_empty(),
            Direction::Push => !self.is_full(),
        }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        let left = self.ring.len();
        if left > 0 {
            tracing::warn!(
                "queue '{}' released with {} values still held",
                self.config.name,
                left
            );
        }
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.config.name)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("sharing", &self.config.sharing)
            .finish()
    }
}

/// A shared handle to a [`Queue`].
pub type SharedQueue<T> = Arc<Queue<T>>;

/// Create a new shared queue.
pub fn shared_queue<T>(config: QueueConfig) -> Result<SharedQueue<T>> {
    Ok(Arc::new(Queue::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_capacity_invariant() {
        let queue = Queue::with_capacity(3).unwrap();
        let mut held = 0usize;

        // Interleave pushes and pops; push fails exactly when full.
        for round in 0..20u32 {
            for i in 0..(round % 5) {
                let full = held == queue.capacity();
                assert_eq!(queue.push(i).is_err(), full);
                if !full {
                    held += 1;
                }
                assert!(queue.len() <= queue.capacity());
            }
            for _ in 0..(round % 3) {
                if queue.pop().is_some() {
                    held -= 1;
                }
            }
            assert_eq!(queue.len(), held);
        }
    }

    #[test]
    fn test_queue_fifo() {
        let queue = Queue::with_capacity(4).unwrap();
        let mut expected = std::collections::VecDeque::new();
        let mut popped = Vec::new();

        for i in 0..50u32 {
            if queue.push(i).is_ok() {
                expected.push_back(i);
            }
            if i % 3 == 0 {
                popped.extend(queue.pop());
            }
        }
        popped.extend(queue.drain());

        assert_eq!(popped, expected.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_peek_leaves_value() {
        let queue = Queue::with_capacity(2).unwrap();
        assert_eq!(queue.peek(), None);
        queue.push(String::from("a")).unwrap();
        queue.push(String::from("b")).unwrap();

        assert_eq!(queue.peek().as_deref(), Some("a"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.peek().as_deref(), Some("b"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Queue::<u8>::with_capacity(0),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_clean_requires_empty() {
        let queue = Queue::with_capacity(2).unwrap();
        queue.push("a").unwrap();
        assert!(matches!(queue.clean(), Err(Error::QueueNotEmpty(1))));
        assert_eq!(queue.drain(), vec!["a"]);
        assert!(queue.clean().is_ok());
    }

    #[test]
    fn test_notifiers_follow_transitions() {
        let queue = Queue::with_capacity(1).unwrap();

        assert!(!queue.readable().try_wait().unwrap());
        queue.push(1u8).unwrap();
        assert!(queue.readable().try_wait().unwrap());
        assert!(queue.is_ready(Direction::Pop));
        assert!(!queue.is_ready(Direction::Push));

        // A failed push signals nothing
        queue.push(2).unwrap_err();
        assert!(!queue.readable().try_wait().unwrap());

        assert!(!queue.writable().try_wait().unwrap());
        queue.pop().unwrap();
        assert!(queue.writable().try_wait().unwrap());
        assert!(queue.is_ready(Direction::Push));
    }

    #[test]
    fn test_shared_producers() {
        let queue = shared_queue::<u64>(
            QueueConfig::with_capacity(1024).with_sharing(Sharing::MultiProducer),
        )
        .unwrap();

        let handles: Vec<_> = (0..4u64)
            .map(|p| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let values = queue.drain();
        assert_eq!(values.len(), 400);

        // Per-producer order is preserved
        for p in 0..4u64 {
            let mine: Vec<_> = values.iter().filter(|v| **v / 1000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_debug_output() {
        let queue: Queue<u8> = Queue::new(QueueConfig::with_capacity(8).with_name("q1")).unwrap();
        let s = format!("{:?}", queue);
        assert!(s.contains("q1"));
        assert!(s.contains("capacity: 8"));
    }
}
