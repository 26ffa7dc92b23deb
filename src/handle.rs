// src/handle.rs
//! Per-object metadata wrapper: [`Handle<T>`].

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use crate::stack::Stack;

/// Sentinel `last_recycled_id`/`recycle_id` value meaning "handed out to a
/// user, not currently sitting in any container."
pub(crate) const IN_FLIGHT: u64 = 0;

/// Sentinel value written by `Stack::push_now` (the owner thread pushing
/// directly onto its own stack, bypassing any queue).
pub(crate) const OWN_THREAD_SENTINEL: u64 = 1;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(2);

/// Allocates a fresh, globally unique id for a new `HandoffQueue`. Ids start
/// at 2 so they never collide with [`IN_FLIGHT`] (0) or
/// [`OWN_THREAD_SENTINEL`] (1).
pub(crate) fn next_queue_id() -> u64 {
    NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A pooled object plus the bookkeeping needed to recycle it safely.
///
/// # Invariants
///
/// - The wrapped object is set once, at construction, and never replaced.
/// - `recycle_id == IN_FLIGHT` iff the handle is currently checked out to a
///   user (not sitting in any `Stack` or `Link`).
/// - `recycle_id != IN_FLIGHT` implies the handle sits in exactly one
///   container: its home `Stack`, or one `Link` slot of one `HandoffQueue`.
pub struct Handle<T> {
    pub(crate) value: T,
    /// The identity (queue id, or [`OWN_THREAD_SENTINEL`]) that most
    /// recently placed this handle into a container. Canonicalized to equal
    /// `last_recycled_id` once a cross-thread transfer completes.
    pub(crate) recycle_id: AtomicU64,
    /// The identity that claimed this handle's handoff slot via CAS.
    /// Compared against `recycle_id` to detect double-recycle.
    pub(crate) last_recycled_id: AtomicU64,
    /// Admission-sampling state: has this handle ever survived the
    /// `interval`-of-N filter once already? Once true, it always keeps,
    /// bypassing whatever shared counter is passed to [`Handle::admit`].
    /// A plain `Cell`, not an atomic: a handle is moved between containers,
    /// never shared by reference across threads, so exactly one "toucher"
    /// ever reads or writes this at a time.
    pub(crate) been_sampled: Cell<bool>,
    /// The stack this handle always returns to. Weak so an in-flight
    /// handle held by a foreign thread doesn't keep a dead owner thread's
    /// stack alive.
    pub(crate) home: Weak<Stack<T>>,
}

impl<T> Handle<T> {
    pub(crate) fn new(value: T, home: Weak<Stack<T>>) -> Self {
        Self {
            value,
            recycle_id: AtomicU64::new(IN_FLIGHT),
            last_recycled_id: AtomicU64::new(IN_FLIGHT),
            been_sampled: Cell::new(false),
            home,
        }
    }

    /// Marks the handle in-flight (checked out to a user). Only the home
    /// stack's `pop()` ever does this.
    pub(crate) fn mark_in_flight(&self) {
        self.last_recycled_id.store(IN_FLIGHT, Ordering::Relaxed);
        self.recycle_id.store(IN_FLIGHT, Ordering::Relaxed);
    }

    /// Returns `true` if `recycle_id` and `last_recycled_id` agree (or both
    /// are `IN_FLIGHT`), i.e. the handle is not mid-corruption.
    pub(crate) fn ids_consistent(&self) -> bool {
        self.recycle_id.load(Ordering::Acquire) == self.last_recycled_id.load(Ordering::Acquire)
    }

    /// Attempts to claim this handle's handoff slot for `claimant_id` via
    /// CAS from [`IN_FLIGHT`]. Returns `true` on success; `false` means
    /// another producer (or the owner thread) already claimed it first —
    /// the caller must drop the handle rather than enqueue it twice.
    pub(crate) fn try_claim(&self, claimant_id: u64) -> bool {
        self.last_recycled_id
            .compare_exchange(IN_FLIGHT, claimant_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Admission sampling: `counter` is a shared
    /// novel-admission counter — owned by the `Stack` (transfer/direct-push
    /// side) or the `HandoffQueue` (enqueue side), *not* by this handle —
    /// incremented once per distinct handle that has never been sampled
    /// before. Once a handle's own `been_sampled` latches true, it always
    /// keeps and never touches `counter` again. `interval == 0` disables
    /// filtering (always keeps, immediately latching).
    pub(crate) fn admit(&self, counter: &Cell<usize>, interval: usize) -> bool {
        if self.been_sampled.get() {
            return true;
        }
        if interval == 0 {
            self.been_sampled.set(true);
            return true;
        }
        let count = counter.get() + 1;
        if count < interval {
            counter.set(count);
            false
        } else {
            counter.set(0);
            self.been_sampled.set(true);
            true
        }
    }
}

// A Handle is moved between threads constantly (that's the whole point of
// the handoff queue); it is Send whenever T is, and never shared by
// reference across threads without the atomics above mediating access.
unsafe impl<T: Send> Send for Handle<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_bounded_growth() {
        // One handle repeatedly re-admitted through the same shared counter:
        // after the first admission `been_sampled` latches true and every
        // subsequent call admits without touching the counter — so only the
        // first `interval` calls are gated.
        let h: Handle<u32> = Handle::new(0, Weak::new());
        let counter = Cell::new(0);
        let interval = 4;
        let mut admitted = 0;
        for _ in 0..20 {
            if h.admit(&counter, interval) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 20 - (interval - 1));
    }

    #[test]
    fn test_admit_shared_counter_across_distinct_handles() {
        // 20 distinct, never-sampled handles sharing one counter: exactly
        // 1-of-`interval` is admitted, each resetting the counter for the
        // next batch.
        let counter = Cell::new(0);
        let interval = 4;
        let mut admitted = 0;
        for i in 0..20u32 {
            let h: Handle<u32> = Handle::new(i, Weak::new());
            if h.admit(&counter, interval) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 20 / interval);
    }

    #[test]
    fn test_admit_zero_interval_always_admits() {
        let h: Handle<u32> = Handle::new(0, Weak::new());
        let counter = Cell::new(0);
        assert!(h.admit(&counter, 0));
        assert!(h.admit(&counter, 0));
    }

    #[test]
    fn test_try_claim_once() {
        let h: Handle<u32> = Handle::new(0, Weak::new());
        assert!(h.try_claim(7));
        assert!(!h.try_claim(8));
    }
}
