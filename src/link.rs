// src/link.rs
//! Fixed-capacity SPSC segment used to chain handoff queues: [`Link`].

use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_utils::CachePadded;

use crate::config::LINK_CAPACITY;
use crate::handle::Handle;

/// One fixed-size array segment of a [`HandoffQueue`](crate::queue::HandoffQueue).
///
/// A `Link` is written by exactly one producer thread and read by exactly
/// one consumer thread (the owning stack's thread, during `scavenge`) — the
/// same discipline as a single-producer/single-consumer ring buffer, except
/// a `Link` never wraps: once full, the producer allocates a new `Link` and
/// publishes it via `next`.
pub(crate) struct Link<T> {
    slots: [UnsafeCell<MaybeUninit<Handle<T>>>; LINK_CAPACITY],
    /// Number of slots written so far. Stored with `Release` by the
    /// producer after the slot write is complete; loaded with `Acquire` by
    /// the consumer before reading a slot — this is the only
    /// synchronization needed between producer and consumer for this link.
    /// Cache-line padded: producer and consumer threads poll it from
    /// different cores.
    write_count: CachePadded<AtomicUsize>,
    /// Number of slots consumed so far. Touched only by the single consumer
    /// thread, so a plain `Cell` suffices.
    read_index: Cell<usize>,
    /// Next segment in the chain, published once by the producer when this
    /// segment fills. Read without locking by the consumer.
    pub(crate) next: ArcSwapOption<Link<T>>,
}

// SAFETY: a `Link<T>`'s slots are written by one producer thread and read
// by one consumer thread, coordinated by `write_count`/`read_index` as
// documented above; no two threads ever touch the same slot concurrently.
unsafe impl<T: Send> Send for Link<T> {}
unsafe impl<T: Send> Sync for Link<T> {}

impl<T> Link<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            write_count: CachePadded::new(AtomicUsize::new(0)),
            read_index: Cell::new(0),
            next: ArcSwapOption::from(None),
        })
    }

    /// Attempts to append `handle` to this segment. Returns the handle back
    /// in `Err` if the segment is full — the caller must allocate a new
    /// `Link` and retry there.
    pub(crate) fn try_push(&self, handle: Handle<T>) -> Result<(), Handle<T>> {
        let count = self.write_count.load(Ordering::Relaxed);
        if count >= LINK_CAPACITY {
            return Err(handle);
        }
        // SAFETY: only the single producer ever writes, and only to slots
        // at or beyond `write_count`, which the consumer has not yet read.
        unsafe {
            (*self.slots[count].get()).write(handle);
        }
        self.write_count.store(count + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the next handle, if any has been published by the producer.
    pub(crate) fn try_pop(&self) -> Option<Handle<T>> {
        let idx = self.read_index.get();
        if idx >= self.write_count.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `idx < write_count` (Acquire-observed), so the producer's
        // write at this slot happened-before this read; the slot was
        // written exactly once and will not be read again since
        // `read_index` advances monotonically.
        let handle = unsafe { (*self.slots[idx].get()).assume_init_read() };
        self.read_index.set(idx + 1);
        Some(handle)
    }

    /// `true` once every slot has been written and consumed — this segment
    /// is exhausted and may be unlinked in favor of `next`.
    pub(crate) fn is_drained(&self) -> bool {
        self.read_index.get() >= LINK_CAPACITY && self.write_count.load(Ordering::Acquire) >= LINK_CAPACITY
    }

    pub(crate) fn is_full(&self) -> bool {
        self.write_count.load(Ordering::Relaxed) >= LINK_CAPACITY
    }
}

impl<T> Drop for Link<T> {
    fn drop(&mut self) {
        let written = *self.write_count.get_mut();
        let read = *self.read_index.get_mut();
        for slot in &mut self.slots[read..written] {
            // SAFETY: slots in `[read, written)` were written and never
            // read (and never will be, since the segment is being dropped).
            unsafe {
                slot.get_mut().assume_init_drop();
            }
        }
    }
}
