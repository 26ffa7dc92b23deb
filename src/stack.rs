// src/stack.rs
//! The per-thread LIFO of free handles: [`Stack`].

use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwapOption;
use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

use crate::error::PoolError;
use crate::handle::{Handle, OWN_THREAD_SENTINEL};
use crate::queue::{HandoffQueue, SharedCapacity};
use crate::registry::PoolRegistries;

/// The per-thread LIFO reservoir of free handles backing one `Pool<T>` on
/// one owner thread.
///
/// Only the owner thread (`self.owner`) ever pops from or pushes directly
/// onto `elements`; every other thread reaches a `Stack` only through
/// [`HandoffQueue`]s chained off `head`, attached via [`Stack::attach_queue`]
/// and drained via [`Stack::scavenge`].
pub(crate) struct Stack<T> {
    owner: ThreadId,
    registries: Arc<PoolRegistries<T>>,
    /// Owner-thread-only: the free list itself.
    elements: UnsafeCell<Vec<Handle<T>>>,
    /// Budget of handle slots that may be queued, in aggregate, across all
    /// of this stack's inbound `HandoffQueue`s. Shared (by `Arc` clone) with
    /// every such queue so reservations and refunds are visible everywhere.
    /// Cache-line padded: every producer thread's `enqueue`/`try_pop` hits
    /// this counter, so it would otherwise false-share the cache line with
    /// whatever else lands next to it in the allocation.
    shared_capacity: SharedCapacity,
    /// Lock-free read by the owner thread; mutated only while holding
    /// `head_lock`.
    head: ArcSwapOption<HandoffQueue<T>>,
    /// Serializes producer threads racing to attach a new queue. Never
    /// taken by the owner thread.
    head_lock: Mutex<()>,
    /// Scavenge iteration cursor and its predecessor in the chain, owner-
    /// thread-only, cached between `pop()` calls so repeated scavenges
    /// resume where the last one left off instead of restarting at `head`.
    cursor: UnsafeCell<Option<Arc<HandoffQueue<T>>>>,
    prev: UnsafeCell<Option<Arc<HandoffQueue<T>>>>,
    /// Shared novel-admission counter for handles arriving via direct push
    /// or transfer. Owner-thread-only (transfer and direct push both run
    /// only on the owner thread).
    admission_counter: Cell<usize>,
}

// SAFETY: `elements`, `cursor`, `prev`, and `admission_counter` are mutated
// only by the owner thread — every method that touches them is reached
// either directly from the owner thread (`pop`, `push_now`, `scavenge`,
// `transfer`) or guarded by a `debug_assert!` checking `thread::current().id()
// == self.owner`. `head` is an `ArcSwapOption`, safe to read and write from
// any thread; `head_lock` serializes the only other mutator (`attach_queue`,
// called by producer threads). No two threads ever alias the `UnsafeCell`
// fields concurrently.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    pub(crate) fn new(owner: ThreadId, registries: Arc<PoolRegistries<T>>) -> Arc<Self> {
        let budget = registries.config.shared_capacity_budget();
        Arc::new(Self {
            owner,
            registries,
            elements: UnsafeCell::new(Vec::new()),
            shared_capacity: Arc::new(CachePadded::new(AtomicIsize::new(budget as isize))),
            head: ArcSwapOption::from(None),
            head_lock: Mutex::new(()),
            cursor: UnsafeCell::new(None),
            prev: UnsafeCell::new(None),
            admission_counter: Cell::new(0),
        })
    }

    fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Clones the shared-capacity handle for a new inbound `HandoffQueue`.
    pub(crate) fn shared_capacity_handle(&self) -> SharedCapacity {
        self.shared_capacity.clone()
    }

    /// Attaches a freshly created queue at the front of this stack's queue
    /// chain. Called by the foreign (producer) thread that just created it,
    /// under `head_lock` — the only lock this type ever takes.
    pub(crate) fn attach_queue(&self, queue: Arc<HandoffQueue<T>>) {
        let _guard = self.head_lock.lock().unwrap();
        let old = self.head.load_full();
        queue.next.store(old);
        self.head.store(Some(queue));
        debug!("attached new handoff queue to stack");
    }

    /// Pops a free handle, scavenging inbound queues first if the local
    /// free list is empty. Returns `None` if nothing is available anywhere
    /// — `Pool::get` must then construct a fresh object.
    pub(crate) fn pop(self: &Arc<Self>) -> Option<Handle<T>> {
        debug_assert!(self.is_owner(), "Stack::pop called from non-owner thread");
        let scavenged = {
            // SAFETY: owner-thread-only, see struct/impl-block docs.
            let elements = unsafe { &*self.elements.get() };
            elements.is_empty() && self.scavenge()
        };
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let elements = unsafe { &mut *self.elements.get() };
        let handle = elements.pop()?;
        debug_assert!(handle.ids_consistent(), "popped handle with inconsistent recycle ids");
        handle.mark_in_flight();
        if scavenged {
            self.registries.stats.scavenge_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.registries.stats.same_thread_hits.fetch_add(1, Ordering::Relaxed);
        }
        Some(handle)
    }

    /// Returns `handle` to this stack: directly if the calling thread owns
    /// it, otherwise via that thread's `HandoffQueue` to this stack.
    pub(crate) fn push(self: &Arc<Self>, handle: Handle<T>) -> Result<(), PoolError> {
        if self.is_owner() {
            self.push_now(handle)
        } else {
            self.push_later(handle)
        }
    }

    fn push_now(&self, handle: Handle<T>) -> Result<(), PoolError> {
        if !handle.try_claim(OWN_THREAD_SENTINEL) {
            // The owner thread is recycling a handle whose slot is already
            // claimed — it was never legitimately checked out again since
            // its last recycle. Fail fast rather than silently corrupt the
            // free list with a handle that's already sitting somewhere.
            return Err(PoolError::DoubleRecycle);
        }
        if !handle.admit(&self.admission_counter, self.registries.config.interval) {
            trace!("dropping unsampled handle on direct return");
            return Ok(());
        }
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let elements = unsafe { &mut *self.elements.get() };
        if elements.len() >= self.registries.config.max_capacity_per_thread {
            trace!("stack at capacity; discarding directly-returned handle");
            return Ok(());
        }
        handle.recycle_id.store(OWN_THREAD_SENTINEL, Ordering::Release);
        elements.push(handle);
        self.registries.stats.recycled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn push_later(self: &Arc<Self>, handle: Handle<T>) -> Result<(), PoolError> {
        match self.registries.foreign_queue_for(self) {
            Some(queue) => match queue.enqueue(handle)? {
                true => {
                    self.registries.stats.recycled.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                false => {
                    trace!("dropping unsampled or capacity-denied handle on cross-thread return");
                    Ok(())
                }
            },
            None => {
                trace!("no handoff queue available; dropping cross-thread recycle");
                Ok(())
            }
        }
    }

    /// Scavenges this stack's inbound queue chain for one batch of
    /// transferable handles, resuming at the cached cursor. Returns `true`
    /// iff the stack's size grew.
    fn scavenge(self: &Arc<Self>) -> bool {
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let cursor = unsafe { &mut *self.cursor.get() };
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let prev = unsafe { &mut *self.prev.get() };
        if cursor.is_none() {
            *cursor = self.head.load_full();
            *prev = None;
        }
        loop {
            let Some(queue) = cursor.clone() else {
                *prev = None;
                return false;
            };
            if self.transfer(&queue) {
                return true;
            }
            if !queue.is_producer_alive() {
                // Final drain: the producer is gone, so nothing more will
                // ever arrive; grab whatever it published before dying.
                while self.transfer(&queue) {}
                // Pays back the flat LINK_CAPACITY `foreign_queue_for`
                // reserved when this queue was created; every per-handle
                // unit already flows back through `transfer`/`try_pop`.
                // Idempotent: the head queue is never physically unlinked
                // (see below) and gets revisited on every later scavenge.
                queue.refund_creation_reservation();
                let next = queue.next.load_full();
                match prev.as_ref() {
                    Some(p) => {
                        p.next.store(next.clone());
                        debug!("unlinked dead producer's handoff queue");
                    }
                    None => {
                        // Never unlink the head — would require synchronizing
                        // `head` itself. Leave it attached, permanently drained.
                    }
                }
                *cursor = next;
                continue;
            }
            *prev = Some(queue.clone());
            *cursor = queue.next.load_full();
        }
    }

    /// Drops every handle currently sitting in the local free list. Queued
    /// cross-thread returns are untouched — they're scavenged (or found
    /// stale) on the next `pop()`.
    pub(crate) fn clear(&self) {
        debug_assert!(self.is_owner(), "Stack::clear called from non-owner thread");
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let elements = unsafe { &mut *self.elements.get() };
        elements.clear();
    }

    /// Transfers every currently-published handle out of `queue`'s head
    /// link into this stack. Returns `true` iff at least one handle was
    /// kept (the stack's size grew).
    fn transfer(&self, queue: &Arc<HandoffQueue<T>>) -> bool {
        let mut grew = false;
        // SAFETY: owner-thread-only, see struct/impl-block docs.
        let elements = unsafe { &mut *self.elements.get() };
        while let Some(handle) = queue.try_pop() {
            debug_assert!(handle.ids_consistent(), "try_pop must only ever return canonically-consistent handles");
            if !handle.admit(&self.admission_counter, self.registries.config.interval) {
                continue;
            }
            if elements.len() >= self.registries.config.max_capacity_per_thread {
                trace!("stack at capacity; discarding transferred handle");
                continue;
            }
            elements.push(handle);
            grew = true;
        }
        grew
    }
}
