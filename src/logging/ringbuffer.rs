// SPDX-License-Identifier: Apache-2.0 OR MIT
// Lock-free ring buffer feeding the batch worker
//
// Producers reserve sequence numbers on `head`; the single consumer owns `tail`.
// Every slot carries a small state machine (EMPTY -> WRITING -> READY -> EMPTY)
// so a reader never observes a half-written slot and two producers holding
// distinct sequence numbers never touch the same slot at once.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// Spins a reader waits for a reserved slot to become READY before giving up
const MAX_READ_SPINS: u32 = 1000;

/// Cache-aligned wrapper to prevent false sharing
#[repr(align(64))]
struct CacheAligned<T>(T);

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<Option<T>>,
}

/// Round `n` up to the next power of two (minimum 1).
///
/// Idempotent: `next_power_of_two(next_power_of_two(n)) == next_power_of_two(n)`.
#[inline]
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Fixed-capacity circular buffer with multi-producer insertion and a single
/// consumer.
///
/// The buffer applies no backpressure on the [`push_admitted`] path: callers
/// are expected to gate insertions with their own occupancy check (the
/// buffered adapter does this with its `queue_len` counter). [`try_push`] is
/// the self-checking variant for standalone use.
///
/// [`push_admitted`]: RingBuffer::push_admitted
/// [`try_push`]: RingBuffer::try_push
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    consuming: AtomicBool,
}

// SAFETY: RingBuffer is Send + Sync when T is Send because:
// - producers only write a slot after winning its EMPTY -> WRITING transition
// - the consumer only reads a slot in READY state, under the consumer guard
// - values move between threads but are never shared by reference
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring buffer holding at least `size` items.
    ///
    /// Capacity is `size` rounded up to the next power of two.
    pub fn new(size: usize) -> Self {
        let capacity = next_power_of_two(size);
        let slots: Vec<Slot<T>> = (0..capacity)
            .map(|_| Slot {
                state: AtomicU8::new(EMPTY),
                value: UnsafeCell::new(None),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            head: CacheAligned(AtomicU64::new(0)),
            tail: CacheAligned(AtomicU64::new(0)),
            consuming: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of reserved-but-unread items (`head - tail`)
    pub fn len(&self) -> usize {
        // tail first: head never trails a tail read before it
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an item the caller has already admitted.
    ///
    /// Reserves the next sequence number with `fetch_add` and writes the slot.
    /// Never fails: if a caller over-admits, the write waits for the consumer
    /// to release the slot instead of overwriting unread data.
    pub fn push_admitted(&self, item: T) {
        let seq = self.head.0.fetch_add(1, Ordering::AcqRel);
        self.write_slot(seq, item);
    }

    /// Insert an item if there is room, handing it back when full.
    ///
    /// Lock-free: producers race on `head` with compare-and-swap against the
    /// consumer's `tail`.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let capacity = self.capacity() as u64;
        let mut head = self.head.0.load(Ordering::Acquire);
        loop {
            let tail = self.tail.0.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= capacity {
                return Err(item);
            }
            match self.head.0.compare_exchange_weak(
                head,
                head + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => {
                    head = current;
                    std::hint::spin_loop();
                }
            }
        }
        self.write_slot(head, item);
        Ok(())
    }

    fn write_slot(&self, seq: u64, item: T) {
        let slot = &self.slots[(seq & self.mask) as usize];

        let mut spins = 0u32;
        while slot
            .state
            .compare_exchange_weak(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }

        // SAFETY: the EMPTY -> WRITING transition gives this producer exclusive
        // access to the slot until it publishes READY.
        unsafe {
            *slot.value.get() = Some(item);
        }
        slot.state.store(READY, Ordering::Release);
    }

    /// Take the oldest item (single consumer).
    ///
    /// Returns `None` when empty, when the next slot is still being written,
    /// or when another consumer is active.
    pub fn take(&self) -> Option<T> {
        let _guard = self.consumer()?;

        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let item = self.take_slot((tail & self.mask) as usize)?;
        self.tail.0.store(tail + 1, Ordering::Release);
        Some(item)
    }

    /// Take up to `max` items into a freshly allocated vector.
    pub fn take_batch(&self, max: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max.min(self.len()));
        self.take_into(&mut batch, max);
        batch
    }

    /// Take up to `max` items, appending them to a caller-supplied buffer.
    ///
    /// Returns how many were taken. The readable range may wrap past the end
    /// of the slot array, in which case it is walked as two spans.
    pub fn take_into(&self, buf: &mut Vec<T>, max: usize) -> usize {
        let Some(_guard) = self.consumer() else {
            return 0;
        };

        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let count = (head.wrapping_sub(tail) as usize).min(max);
        if count == 0 {
            return 0;
        }

        let start = (tail & self.mask) as usize;
        let first = count.min(self.capacity() - start);
        let spans = [start..start + first, 0..count - first];

        let mut taken = 0usize;
        'spans: for span in spans {
            for index in span {
                match self.take_slot(index) {
                    Some(item) => {
                        buf.push(item);
                        taken += 1;
                    }
                    // Writer still mid-flight; stop here and keep order.
                    None => break 'spans,
                }
            }
        }

        self.tail.0.store(tail + taken as u64, Ordering::Release);
        taken
    }

    /// Take everything currently available.
    pub fn drain(&self) -> Vec<T> {
        self.take_batch(self.capacity())
    }

    fn take_slot(&self, index: usize) -> Option<T> {
        let slot = &self.slots[index];

        let mut spins = 0;
        while slot.state.load(Ordering::Acquire) != READY {
            if spins >= MAX_READ_SPINS {
                return None;
            }
            spins += 1;
            std::hint::spin_loop();
        }

        // SAFETY: READY means the producer finished writing; nobody else touches
        // the slot until it is marked EMPTY, and the consumer guard excludes
        // other readers.
        let item = unsafe { (*slot.value.get()).take() };
        slot.state.store(EMPTY, Ordering::Release);
        item
    }

    fn consumer(&self) -> Option<ConsumerGuard<'_>> {
        if self.consuming.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(ConsumerGuard(&self.consuming))
        }
    }
}

struct ConsumerGuard<'a>(&'a AtomicBool);

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
