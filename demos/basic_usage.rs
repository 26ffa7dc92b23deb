// demos/basic_usage.rs
//! Basic usage of a thread-local object pool.

use recycler::prelude::*;

fn main() {
    println!("=== Basic Pool Usage ===\n");

    // A pool of reusable byte buffers, each built by the factory closure.
    let pool: Pool<Vec<u8>> = Pool::new(PoolConfig::default(), || Vec::with_capacity(4096));

    {
        let mut buf = pool.get();
        buf.extend_from_slice(b"hello pool");
        println!("buf len: {}", buf.len());
        // `buf` recycles automatically here.
    }

    // The second get() reuses the buffer from the first, on the same thread.
    let mut buf2 = pool.get();
    buf2.extend_from_slice(b"reused");
    println!("buf2 len: {}", buf2.len());
    drop(buf2);

    let stats = pool.stats();
    println!(
        "stats: acquired={}, allocated={}, recycled={}, same_thread_hit_rate={:.1}%",
        stats.acquired,
        stats.allocated,
        stats.recycled,
        stats.same_thread_hit_rate()
    );

    println!("\n=== Manual Control ===\n");

    let leaked = pool.get().leak();
    println!("leaked buffer, capacity {}, never returns to the pool", leaked.capacity());

    let held = pool.get();
    held.recycle_now();
    println!("explicitly recycled rather than waiting for drop");

    println!("\n=== Disabled Pool ===\n");

    let passthrough: Pool<String> = Pool::new(PoolConfig::disabled(), String::new);
    let _a = passthrough.get();
    let _b = passthrough.get();
    println!("disabled pool allocated={}", passthrough.stats().allocated);
}
