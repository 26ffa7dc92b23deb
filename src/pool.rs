// src/pool.rs
//! The user-facing façade: [`Pool`] and the [`Pooled`] smart-pointer it hands
//! out.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use thread_local::ThreadLocal;
use tracing::error;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::Handle;
use crate::registry::PoolRegistries;
use crate::stack::Stack;
use crate::stats::{PoolStats, StatsInner};

/// A thread-local object pool binding a factory function to a per-thread
/// [`Stack`] of recyclable handles.
///
/// `get()` borrows (or, failing that, constructs) a `T`, wrapped in a
/// [`Pooled<T>`] that returns it to its home stack automatically on drop.
/// Objects may come back on any thread — same-thread returns go straight
/// onto the owner's stack; cross-thread returns queue up on a
/// [`HandoffQueue`](crate::HandoffQueue) the owner's stack scavenges from on
/// its next `get()`.
///
/// # Example
///
/// ```
/// use recycler::{Pool, PoolConfig};
///
/// let pool: Pool<Vec<u8>> = Pool::new(PoolConfig::default(), || Vec::with_capacity(4096));
///
/// let mut buf = pool.get();
/// buf.extend_from_slice(b"hello");
/// // `buf` is recycled automatically when it goes out of scope.
/// ```
pub struct Pool<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    homes: ThreadLocal<Arc<Stack<T>>>,
    registries: Arc<PoolRegistries<T>>,
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("config", &self.registries.config).finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Creates a new pool with the given configuration. `factory` constructs
    /// a fresh `T` whenever no pooled instance is available; it must be
    /// cheap to call from any thread.
    pub fn new(config: PoolConfig, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let config = config.normalized();
        Self {
            factory: Box::new(factory),
            homes: ThreadLocal::new(),
            registries: PoolRegistries::new(config, Arc::new(StatsInner::default())),
        }
    }

    /// Obtains an object from the calling thread's stack, scavenging
    /// cross-thread returns if the stack is locally empty, or constructing a
    /// fresh one via the factory as a last resort.
    ///
    /// If `max_capacity_per_thread == 0`, pooling is disabled entirely:
    /// every call constructs fresh and the returned [`Pooled<T>`] drops `T`
    /// directly instead of recycling it.
    pub fn get(&self) -> Pooled<T> {
        self.registries.stats.acquired.fetch_add(1, Ordering::Relaxed);

        if self.registries.config.max_capacity_per_thread == 0 {
            self.registries.stats.allocated.fetch_add(1, Ordering::Relaxed);
            return Pooled { inner: Some(PooledInner::Unpooled((self.factory)())) };
        }

        let stack = self.home_stack();
        if let Some(handle) = stack.pop() {
            return Pooled { inner: Some(PooledInner::Handle(handle)) };
        }

        self.registries.stats.allocated.fetch_add(1, Ordering::Relaxed);
        let handle = Handle::new((self.factory)(), Arc::downgrade(&stack));
        Pooled { inner: Some(PooledInner::Handle(handle)) }
    }

    /// Explicitly recycles `pooled`, verifying it was issued by this pool.
    /// Equivalent to letting `pooled` drop, except it reports
    /// [`PoolError::AlienHandle`] rather than silently pushing a foreign
    /// handle onto whatever stack it actually belongs to.
    ///
    /// Most callers don't need this — `Pooled::drop` already recycles.
    /// It exists for callers who want a `Result` back, or who want to
    /// confirm a handle really came from this specific `Pool`.
    pub fn recycle(&self, mut pooled: Pooled<T>) -> Result<(), PoolError> {
        match pooled.inner.take() {
            Some(PooledInner::Unpooled(_)) => Ok(()),
            Some(PooledInner::Handle(handle)) => {
                let Some(home) = handle.home.upgrade() else { return Ok(()) };
                if !self.owns(&home) {
                    return Err(PoolError::AlienHandle);
                }
                home.push(handle)
            }
            None => Ok(()),
        }
    }

    /// Returns a point-in-time snapshot of this pool's activity counters.
    pub fn stats(&self) -> PoolStats {
        self.registries.stats.snapshot()
    }

    /// Drops every handle currently sitting in the calling thread's local
    /// stack. Cross-thread queued returns are unaffected; they're scavenged
    /// (or dropped as stale) the next time this thread's stack is consulted.
    ///
    /// Useful before a long-lived thread exits, to release pooled objects
    /// immediately rather than waiting for the stack's own teardown.
    pub fn clear_thread_cache(&self) {
        if let Some(stack) = self.homes.get() {
            stack.clear();
        }
    }

    fn home_stack(&self) -> Arc<Stack<T>> {
        self.homes
            .get_or(|| Stack::new(thread::current().id(), self.registries.clone()))
            .clone()
    }

    fn owns(&self, stack: &Arc<Stack<T>>) -> bool {
        self.homes.iter().any(|s| Arc::ptr_eq(s, stack))
    }
}

enum PooledInner<T> {
    Handle(Handle<T>),
    /// Pool is disabled (`max_capacity_per_thread == 0`); just wraps `T`
    /// with no recycling machinery at all.
    Unpooled(T),
}

/// A `T` borrowed from a [`Pool`].
///
/// Derefs to `T`. On drop it is recycled automatically; use
/// [`Pooled::leak`] to detach without recycling, or
/// [`Pooled::recycle_now`] to recycle eagerly instead of waiting for drop.
pub struct Pooled<T> {
    inner: Option<PooledInner<T>>,
}

impl<T> Pooled<T> {
    /// Detaches the object from pool bookkeeping without recycling it. The
    /// caller takes full ownership; `T`'s own `Drop` (if any) still runs
    /// normally when the returned value is eventually dropped.
    pub fn leak(mut self) -> T {
        match self.inner.take() {
            Some(PooledInner::Handle(handle)) => handle.value,
            Some(PooledInner::Unpooled(value)) => value,
            None => unreachable!("Pooled always holds a value until consumed"),
        }
    }

    /// Recycles the object immediately rather than waiting for `drop`.
    pub fn recycle_now(mut self) {
        self.recycle_inner();
    }

    fn recycle_inner(&mut self) {
        match self.inner.take() {
            Some(PooledInner::Handle(handle)) => {
                let Some(home) = handle.home.upgrade() else {
                    // Owner thread's stack is gone; nothing to recycle into.
                    return;
                };
                if let Err(err) = home.push(handle) {
                    error!(?err, "automatic recycle failed; this is a programming error");
                }
            }
            Some(PooledInner::Unpooled(_)) | None => {}
        }
    }

    fn value(&self) -> &T {
        match self.inner.as_ref().expect("Pooled always holds a value until consumed") {
            PooledInner::Handle(handle) => &handle.value,
            PooledInner::Unpooled(value) => value,
        }
    }

    fn value_mut(&mut self) -> &mut T {
        match self.inner.as_mut().expect("Pooled always holds a value until consumed") {
            PooledInner::Handle(handle) => &mut handle.value,
            PooledInner::Unpooled(value) => value,
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value()
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.value(), f)
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.recycle_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn test_get_constructs_fresh_when_empty() {
        let pool: Pool<u32> = Pool::new(PoolConfig::default(), || 42);
        let v = pool.get();
        assert_eq!(*v, 42);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_recycle_then_reuse_same_thread() {
        let allocs = StdArc::new(AtomicUsize::new(0));
        let a = allocs.clone();
        let pool: Pool<u32> = Pool::new(PoolConfig { interval: 0, ..PoolConfig::default() }, move || {
            a.fetch_add(1, Ordering::Relaxed);
            0
        });

        {
            let v = pool.get();
            assert_eq!(allocs.load(Ordering::Relaxed), 1);
            drop(v);
        }

        let _v2 = pool.get();
        // interval == 0 disables admission filtering, so the first recycle
        // is immediately available for reuse — no second allocation.
        assert_eq!(allocs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_disabled_pool_never_reuses() {
        let pool: Pool<u32> = Pool::new(PoolConfig::disabled(), || 0);
        {
            let _v = pool.get();
        }
        let _v2 = pool.get();
        assert_eq!(pool.stats().allocated, 2);
    }

    #[test]
    fn test_leak_detaches_without_recycling() {
        let pool: Pool<u32> = Pool::new(PoolConfig { interval: 0, ..PoolConfig::default() }, || 0);
        let v = pool.get();
        let _owned: u32 = v.leak();
        // Nothing to recycle; a fresh get() allocates again.
        let _v2 = pool.get();
        assert_eq!(pool.stats().allocated, 2);
    }

    #[test]
    fn test_cross_pool_recycle_rejected() {
        let pool_a: Pool<u32> = Pool::new(PoolConfig::default(), || 0);
        let pool_b: Pool<u32> = Pool::new(PoolConfig::default(), || 0);
        let handle = pool_a.get();
        match pool_b.recycle(handle) {
            Err(PoolError::AlienHandle) => {}
            other => panic!("expected AlienHandle, got {other:?}"),
        }
        // pool_a is unaffected: it never received a bogus recycle either.
        assert_eq!(pool_a.stats().recycled, 0);
    }
}
