//! Lock-free single-producer single-consumer ring buffer.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache line size for padding.
const CACHE_LINE: usize = 64;

/// Padded atomic for avoiding false sharing.
#[repr(C)]
struct PaddedAtomicUsize {
    value: AtomicUsize,
    _padding: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
}

impl PaddedAtomicUsize {
    fn new(val: usize) -> Self {
        Self {
            value: AtomicUsize::new(val),
            _padding: [0; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
        }
    }

    fn load(&self, order: Ordering) -> usize {
        self.value.load(order)
    }

    fn store(&self, val: usize, order: Ordering) {
        self.value.store(val, order)
    }
}

/// A slot in the ring buffer.
struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded ring of `T` with one writer of `tail` and one writer of `head`.
///
/// `tail` counts values ever pushed, `head` values ever popped. Both grow
/// monotonically (wrapping) and are reduced modulo the slot count only when
/// indexing, so `tail - head` is always the occupancy.
pub(crate) struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,

    /// Mask for index wrapping (slot count - 1, slot count is a power of 2).
    mask: usize,

    /// Maximum occupancy. May be below the slot count.
    limit: usize,

    /// Read position (only modified by the consumer).
    head: PaddedAtomicUsize,

    /// Write position (only modified by the producer).
    tail: PaddedAtomicUsize,
}

// SAFETY: slot access is partitioned by the head/tail protocol; values are
// moved between threads, which requires T: Send.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring holding at most `capacity` values.
    ///
    /// The slot array is rounded up to a power of 2 so that indexing is a
    /// mask; capacity must be non-zero.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        let slot_count = capacity.next_power_of_two();
        let slots: Vec<Slot<T>> = (0..slot_count)
            .map(|_| Slot {
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: slot_count - 1,
            limit: capacity,
            head: PaddedAtomicUsize::new(0),
            tail: PaddedAtomicUsize::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.limit
    }

    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        // Not a snapshot: pops and pushes between the two loads can overshoot.
        tail.wrapping_sub(head).min(self.limit)
    }

    /// Try to push a value (producer side).
    ///
    /// Returns `Err(value)` if the ring is full.
    ///
    /// # Safety
    ///
    /// At most one thread may be inside `push` at any time.
    pub(crate) unsafe fn push(&self, value: T) -> Result<usize, T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.capacity() {
            return Err(value);
        }

        let slot = &self.slots[tail & self.mask];
        // SAFETY: we are the only producer and the slot is outside
        // [head, tail), so the consumer does not touch it.
        unsafe {
            (*slot.value.get()).write(value);
        }

        // Publish the write
        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        Ok(tail.wrapping_add(1).wrapping_sub(head))
    }

    /// Try to pop a value (consumer side).
    ///
    /// Returns the value and the occupancy observed before the pop.
    ///
    /// # Safety
    ///
    /// At most one thread may be inside `pop` at any time.
    pub(crate) unsafe fn pop(&self) -> Option<(T, usize)> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &self.slots[head & self.mask];
        // SAFETY: we are the only consumer and the Acquire load of `tail`
        // makes the producer's write of this slot visible.
        let value = unsafe { (*slot.value.get()).assume_init_read() };

        // Publish the read
        self.head.store(head.wrapping_add(1), Ordering::Release);

        Some((value, tail.wrapping_sub(head)))
    }

    /// Clone the oldest value without removing it (consumer side).
    ///
    /// # Safety
    ///
    /// Same contract as [`pop`](Self::pop).
    pub(crate) unsafe fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &self.slots[head & self.mask];
        // SAFETY: as in `pop`; the slot stays owned by the ring.
        Some(unsafe { (*slot.value.get()).assume_init_ref().clone() })
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let head = *self.head.value.get_mut();
        let tail = *self.tail.value.get_mut();
        let mut idx = head;
        while idx != tail {
            // SAFETY: exclusive access; slots in [head, tail) are initialized.
            unsafe {
                self.slots[idx & self.mask].value.get_mut().assume_init_drop();
            }
            idx = idx.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_ring_buffer_basic() {
        let ring = RingBuffer::new(4);

        assert_eq!(ring.len(), 0);

        unsafe {
            assert_eq!(ring.push(1u64), Ok(1));
            assert_eq!(ring.push(2), Ok(2));
            assert_eq!(ring.push(3), Ok(3));
            assert_eq!(ring.push(4), Ok(4));

            // Can't push more
            assert_eq!(ring.push(5), Err(5));
            assert_eq!(ring.len(), 4);

            assert_eq!(ring.pop(), Some((1, 4)));
            assert_eq!(ring.pop(), Some((2, 3)));

            // Can push again, wrapping around the slots
            ring.push(5).unwrap();
            ring.push(6).unwrap();

            assert_eq!(ring.pop().map(|(v, _)| v), Some(3));
            assert_eq!(ring.pop().map(|(v, _)| v), Some(4));
            assert_eq!(ring.pop().map(|(v, _)| v), Some(5));
            assert_eq!(ring.pop().map(|(v, _)| v), Some(6));
            assert!(ring.pop().is_none());
        }
    }

    #[test]
    fn test_non_power_of_two_limit() {
        let ring = RingBuffer::new(3);
        assert_eq!(ring.capacity(), 3);
        unsafe {
            ring.push('a').unwrap();
            ring.push('b').unwrap();
            ring.push('c').unwrap();
            assert_eq!(ring.push('d'), Err('d'));
            assert_eq!(ring.pop().map(|(v, _)| v), Some('a'));
            ring.push('d').unwrap();
        }
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_drop_releases_resident_values() {
        let marker = Rc::new(());
        {
            let ring = RingBuffer::new(2);
            unsafe {
                ring.push(marker.clone()).unwrap();
                ring.push(marker.clone()).unwrap();
                drop(ring.pop());
            }
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
