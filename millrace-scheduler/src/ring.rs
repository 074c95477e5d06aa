//! Fixed-capacity demultiplexing ring buffer.
//!
//! Accepts items from arbitrary producer threads and serializes them to one
//! or more consumer threads without an unbounded queue. Capacity must be a
//! power of two: slot indices are computed with a `capacity - 1` bit mask
//! instead of a modulo, so any other capacity cannot address the buffer.
//!
//! The implementation is the classic bounded MPMC queue: every slot carries
//! a sequence number that encodes whether it is free for the producer lap or
//! holds a value for the consumer lap. Producers and consumers claim
//! positions with a CAS and publish with a release store on the slot
//! sequence.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::RingError;

struct Slot<T> {
    /// Free for producers when `sequence == position`; readable for
    /// consumers when `sequence == position + 1`.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer multi-consumer ring buffer.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Next position to enqueue at.
    tail: CachePadded<AtomicUsize>,
    /// Next position to dequeue from.
    head: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.slots.len())
            .field("mask", &self.mask)
            .field("tail", &self.tail)
            .field("head", &self.head)
            .finish()
    }
}

impl<T> RingBuffer<T> {
    /// Create a ring with the given capacity.
    ///
    /// Rejects capacities that are zero or not a power of two; the
    /// constraint is validated here, never silently rounded at runtime.
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::CapacityNotPowerOfTwo(capacity));
        }

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: capacity - 1,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Approximate number of occupied slots.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    /// Whether the ring is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to enqueue without blocking.
    ///
    /// Returns the value back when the ring is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[tail & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let lag = sequence as isize - tail as isize;

            if lag == 0 {
                // Slot is free for this lap; claim the position.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if lag < 0 {
                // Slot still holds the previous lap's value: full.
                return Err(value);
            } else {
                // Another producer moved past us; reload.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[head & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let lag = sequence as isize - head.wrapping_add(1) as isize;

            if lag == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // Mark the slot free for the producer's next lap.
                        slot.sequence
                            .store(head.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if lag < 0 {
                // Nothing published at this position yet: empty.
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_rejects_non_power_of_two_capacity() {
        let err = RingBuffer::<u64>::with_capacity(10).unwrap_err();
        assert_eq!(err, RingError::CapacityNotPowerOfTwo(10));
        assert!(err.to_string().contains("power of two"));

        assert!(RingBuffer::<u64>::with_capacity(0).is_err());
        assert!(RingBuffer::<u64>::with_capacity(7).is_err());
    }

    #[test]
    fn test_accepts_power_of_two_capacity() {
        for capacity in [1, 2, 8, 1024] {
            let ring = RingBuffer::<u64>::with_capacity(capacity).unwrap();
            assert_eq!(ring.capacity(), capacity);
        }
    }

    #[test]
    fn test_fifo_single_threaded() {
        let ring = RingBuffer::with_capacity(8).unwrap();
        for i in 0..8u64 {
            ring.try_push(i).unwrap();
        }
        assert!(ring.try_push(99).is_err());

        for i in 0..8u64 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_wraps_around() {
        let ring = RingBuffer::with_capacity(4).unwrap();
        for round in 0..10u64 {
            for i in 0..4u64 {
                ring.try_push(round * 4 + i).unwrap();
            }
            for i in 0..4u64 {
                assert_eq!(ring.try_pop(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn test_len_tracks_occupancy() {
        let ring = RingBuffer::with_capacity(8).unwrap();
        assert!(ring.is_empty());
        ring.try_push(1u64).unwrap();
        ring.try_push(2u64).unwrap();
        assert_eq!(ring.len(), 2);
        ring.try_pop();
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_mpmc_no_loss_no_duplication() {
        const PRODUCERS: u64 = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 5_000;

        let ring = Arc::new(RingBuffer::with_capacity(64).unwrap());
        let popped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let total = (PRODUCERS * PER_PRODUCER) as usize;
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let ring = ring.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut value = p * PER_PRODUCER + i;
                    loop {
                        match ring.try_push(value) {
                            Ok(()) => break,
                            Err(v) => {
                                value = v;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let ring = ring.clone();
            let popped = popped.clone();
            consumers.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                while popped.load(Ordering::SeqCst) < total {
                    if let Some(v) = ring.try_pop() {
                        popped.fetch_add(1, Ordering::SeqCst);
                        seen.push(v);
                    } else {
                        std::thread::yield_now();
                    }
                }
                seen
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.join().unwrap());
        }

        assert_eq!(all.len(), total);
        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "duplicated values");
    }

    #[test]
    fn test_drop_releases_remaining_items() {
        let ring = RingBuffer::with_capacity(8).unwrap();
        let value = Arc::new(());
        for _ in 0..4 {
            ring.try_push(value.clone()).unwrap();
        }
        assert_eq!(Arc::strong_count(&value), 5);
        drop(ring);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
