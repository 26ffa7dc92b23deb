// src/config.rs
//! Configuration for pool behavior.

/// Fixed capacity of a [`Link`](crate::link::Link) segment, in handle slots.
///
/// A build-time constant (power of two, minimum 16) rather than a runtime
/// knob: making it a const generic would thread a `const CAP: usize`
/// parameter through every type in the crate for a value that essentially
/// never changes in practice.
pub const LINK_CAPACITY: usize = 16;

/// Configuration for a [`Pool`](crate::Pool)'s capacity and admission behavior.
///
/// All fields are read once at `Pool` construction; nothing here is
/// re-validated on the hot path.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on a thread's `Stack` size (`elements.len()`).
    ///
    /// `0` disables pooling entirely: every `get()` allocates fresh and
    /// `recycle()` is a no-op.
    pub max_capacity_per_thread: usize,
    /// Per-stack inbound-queue budget is `max_capacity_per_thread / factor`,
    /// floored at `LINK_CAPACITY`. Clamped to a minimum of 2.
    pub max_shared_capacity_factor: usize,
    /// `1`-of-`N` admission of novel handles on recycle. `0` disables the
    /// filter (every novel handle is admitted immediately).
    pub interval: usize,
    /// Cap on distinct foreign stacks a thread may service with a real
    /// `HandoffQueue`; beyond this, new foreign stacks get the dummy
    /// sentinel and their recycles are dropped.
    pub max_delayed_queues_per_thread: usize,
    /// Admission ratio applied on the enqueue (producer) side. Defaults to
    /// `interval`.
    pub delayed_queue_interval: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_capacity_per_thread: 4096,
            max_shared_capacity_factor: 2,
            interval: 8,
            max_delayed_queues_per_thread: default_max_delayed_queues(),
            delayed_queue_interval: 8,
        }
    }
}

fn default_max_delayed_queues() -> usize {
    2 * std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl PoolConfig {
    /// Validates and normalizes the configuration: clamps
    /// `max_shared_capacity_factor` to a minimum of 2 (a factor below 2
    /// would let the inbound-queue budget exceed the stack's own capacity).
    pub(crate) fn normalized(mut self) -> Self {
        self.max_shared_capacity_factor = self.max_shared_capacity_factor.max(2);
        self
    }

    /// Configuration for pools with a handful of short-lived handles
    /// (embedded-style workloads, low churn).
    pub fn light() -> Self {
        Self {
            max_capacity_per_thread: 256,
            max_shared_capacity_factor: 2,
            interval: 4,
            max_delayed_queues_per_thread: default_max_delayed_queues(),
            delayed_queue_interval: 4,
        }
        .normalized()
    }

    /// Configuration for high-throughput servers recycling many objects
    /// per second across many threads.
    pub fn heavy() -> Self {
        Self {
            max_capacity_per_thread: 32_768,
            max_shared_capacity_factor: 2,
            interval: 8,
            max_delayed_queues_per_thread: default_max_delayed_queues() * 4,
            delayed_queue_interval: 8,
        }
        .normalized()
    }

    /// Disables pooling entirely: every `get()` allocates fresh, every
    /// `recycle()` is a no-op. Useful for A/B-testing whether pooling
    /// actually helps a given workload, or for leak-detection builds.
    pub fn disabled() -> Self {
        Self {
            max_capacity_per_thread: 0,
            max_shared_capacity_factor: 2,
            interval: 0,
            max_delayed_queues_per_thread: 0,
            delayed_queue_interval: 0,
        }
    }

    /// The per-stack shared-capacity budget: the total number of handle
    /// slots that may be queued across all of this stack's inbound
    /// `HandoffQueue`s at once.
    pub(crate) fn shared_capacity_budget(&self) -> usize {
        (self.max_capacity_per_thread / self.max_shared_capacity_factor.max(2)).max(LINK_CAPACITY)
    }
}
