// src/lib.rs
//! # Recycler
//!
//! A thread-local object pool with lock-free cross-thread recycling,
//! modeled on Netty's `Recycler`: every thread keeps its own LIFO stack of
//! free objects, and an object recycled from a thread other than its owner
//! is handed off through a bounded, per-producer-thread queue instead of
//! contending for a shared lock.
//!
//! Features:
//! - Thread-local stacks: same-thread acquire/recycle never takes a lock
//! - Bounded cross-thread handoff via per-producer `HandoffQueue`s
//! - Admission sampling to cap unbounded pool growth under churn
//! - At-most-once recycling enforced by Rust's ownership model, with a
//!   runtime CAS guard as defense-in-depth
//! - Dead-thread-safe: a dying producer or owner thread never leaks memory
//!   or corrupts a still-live stack

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_safety_doc)]

pub mod config;
pub mod error;
mod handle;
mod link;
pub mod pool;
mod queue;
mod registry;
mod stack;
pub mod stats;

// Re-export main types
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use pool::{Pool, Pooled};
pub use stats::PoolStats;

/// Commonly used imports.
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::error::{PoolError, Result};
    pub use crate::pool::{Pool, Pooled};
    pub use crate::stats::PoolStats;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_basic_get_and_drop() {
        let pool: Pool<Vec<u8>> = Pool::new(PoolConfig::default(), || Vec::with_capacity(64));
        let mut buf = pool.get();
        buf.extend_from_slice(b"hello");
        assert_eq!(&buf[..], b"hello");
        drop(buf);
        assert_eq!(pool.stats().acquired, 1);
    }

    #[test]
    fn test_same_thread_reuse() {
        let pool: Pool<u32> = Pool::new(PoolConfig { interval: 0, ..PoolConfig::default() }, || 0);
        for _ in 0..100 {
            let mut v = pool.get();
            *v += 1;
        }
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_cross_thread_handoff() {
        use std::sync::Arc;
        use std::thread;

        let pool: Arc<Pool<u32>> =
            Arc::new(Pool::new(PoolConfig { interval: 0, ..PoolConfig::default() }, || 0));
        let owned = pool.get();

        // Recycle on a different thread than the one that acquired it —
        // this goes through the cross-thread handoff queue, not the
        // worker's own (separate) stack.
        let worker_pool = pool.clone();
        thread::spawn(move || drop(owned)).join().unwrap();

        // Back on the owner thread, get() should scavenge the queued
        // handle instead of allocating a second one.
        let _reused = worker_pool.get();
        let stats = worker_pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.scavenge_hits, 1);
    }

    #[test]
    fn test_disabled_pool() {
        let pool: Pool<u32> = Pool::new(PoolConfig::disabled(), || 0);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().allocated, 2);
    }
}
