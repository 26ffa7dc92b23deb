// src/registry.rs
//! Per-`Pool` shared state and the thread-local foreign-producer registry.
//!
//! Every [`Stack`] belonging to the same [`Pool`](crate::Pool) holds an
//! `Arc` to one [`PoolRegistries`]. It carries the pool's configuration and
//! stats (read by every stack) plus the foreign-producer registry: a
//! per-producer-thread map from home stack to `HandoffQueue`, bounded to
//! `max_delayed_queues_per_thread` entries and keyed weakly enough that a
//! dead home stack never gets pinned alive by a foreign thread's bookkeeping.
//!
//! Registry (a) — owner thread to home `Stack` — lives directly on `Pool`
//! as a `ThreadLocal<Arc<Stack<T>>>`, since a `Stack` is always created
//! lazily on first `get()` from its owner thread; see `pool.rs`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use thread_local::ThreadLocal;
use tracing::warn;

use crate::config::{PoolConfig, LINK_CAPACITY};
use crate::queue::HandoffQueue;
use crate::stack::Stack;
use crate::stats::StatsInner;

enum ForeignSlot<T> {
    Queue(Arc<HandoffQueue<T>>),
    /// Installed once this thread's registry is full; marks a home stack
    /// whose recycles are now silently dropped rather than retried.
    Dummy,
}

/// One producer thread's view of every home stack it has recycled handles
/// into: at most `max` distinct stacks get a real queue, the rest get the
/// dummy sentinel.
struct ForeignRegistry<T> {
    /// Liveness marker for this thread. Every `HandoffQueue` this thread
    /// creates holds only `Weak<()>` to this; the `thread_local` crate drops
    /// the whole `ForeignRegistry` (and this `Arc`) when the thread exits,
    /// which is exactly what lets a home stack detect producer death
    /// without any explicit teardown hook.
    alive: Arc<()>,
    slots: HashMap<usize, ForeignSlot<T>>,
    max: usize,
}

impl<T> ForeignRegistry<T> {
    fn new(max: usize) -> Self {
        Self { alive: Arc::new(()), slots: HashMap::new(), max }
    }
}

pub(crate) struct PoolRegistries<T> {
    pub(crate) config: PoolConfig,
    pub(crate) stats: Arc<StatsInner>,
    foreign: ThreadLocal<RefCell<ForeignRegistry<T>>>,
}

impl<T> PoolRegistries<T> {
    pub(crate) fn new(config: PoolConfig, stats: Arc<StatsInner>) -> Arc<Self> {
        Arc::new(Self { config, stats, foreign: ThreadLocal::new() })
    }

    /// Returns the `HandoffQueue` the calling (foreign) thread should use to
    /// recycle into `home`, creating one on first use for this (thread,
    /// home-stack) pair. Returns `None` if this thread's registry is full
    /// (dummy sentinel already installed for `home`) or the shared capacity
    /// reservation for a new queue failed — either way the caller drops the
    /// handle rather than enqueuing it.
    pub(crate) fn foreign_queue_for(&self, home: &Arc<Stack<T>>) -> Option<Arc<HandoffQueue<T>>> {
        let cell = self
            .foreign
            .get_or(|| RefCell::new(ForeignRegistry::new(self.config.max_delayed_queues_per_thread)));
        let mut reg = cell.borrow_mut();
        let key = Arc::as_ptr(home) as usize;

        if let Some(slot) = reg.slots.get(&key) {
            return match slot {
                ForeignSlot::Queue(queue) => Some(queue.clone()),
                ForeignSlot::Dummy => None,
            };
        }

        if reg.slots.len() >= reg.max {
            warn!(max = reg.max, "foreign registry full; new home stack gets the dummy sentinel");
            reg.slots.insert(key, ForeignSlot::Dummy);
            return None;
        }

        let shared = home.shared_capacity_handle();
        let reserved = shared.fetch_sub(LINK_CAPACITY as isize, Ordering::AcqRel) - LINK_CAPACITY as isize;
        if reserved < 0 {
            shared.fetch_add(LINK_CAPACITY as isize, Ordering::AcqRel);
            return None;
        }

        let queue = Arc::new(HandoffQueue::new(
            shared,
            Arc::downgrade(&reg.alive),
            self.config.delayed_queue_interval,
        ));
        home.attach_queue(queue.clone());
        reg.slots.insert(key, ForeignSlot::Queue(queue.clone()));
        Some(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::thread;

    fn registries(config: PoolConfig) -> Arc<PoolRegistries<u32>> {
        PoolRegistries::new(config, Arc::new(StatsInner::default()))
    }

    #[test]
    fn test_same_stack_reuses_queue() {
        let regs = registries(PoolConfig::default());
        let stack = Stack::new(thread::current().id(), regs.clone());
        let q1 = regs.foreign_queue_for(&stack).unwrap();
        let q2 = regs.foreign_queue_for(&stack).unwrap();
        assert_eq!(q1.id, q2.id);
    }

    #[test]
    fn test_registry_cap_installs_dummy() {
        let config = PoolConfig { max_delayed_queues_per_thread: 1, ..PoolConfig::default() };
        let regs = registries(config);
        let stack_a = Stack::new(thread::current().id(), regs.clone());
        let stack_b = Stack::new(thread::current().id(), regs.clone());
        assert!(regs.foreign_queue_for(&stack_a).is_some());
        assert!(regs.foreign_queue_for(&stack_b).is_none());
        // still none on a second try — the dummy sentinel sticks.
        assert!(regs.foreign_queue_for(&stack_b).is_none());
    }

    #[test]
    fn test_capacity_denied_at_creation() {
        let config = PoolConfig { max_capacity_per_thread: LINK_CAPACITY, max_shared_capacity_factor: 1000, ..PoolConfig::default() };
        let regs = registries(config);
        let stack = Stack::new(thread::current().id(), regs.clone());
        // shared budget floors at LINK_CAPACITY, so exactly one queue fits...
        assert!(regs.foreign_queue_for(&stack).is_some());
    }
}
