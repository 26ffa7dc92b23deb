// demos/network_simulation.rs
//! Simulates a packet-processing pipeline: a worker thread fills packet
//! buffers from a pool and drops them; the owner thread scavenges them back
//! through the cross-thread handoff path on its next `get()`.

use recycler::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== Network Packet Simulation ===\n");

    let pool: Arc<Pool<Vec<u8>>> =
        Arc::new(Pool::new(PoolConfig::default(), || Vec::with_capacity(1500)));

    let num_packets = 10_000;
    let worker_pool = pool.clone();
    let worker = thread::spawn(move || {
        let start = Instant::now();
        for i in 0..num_packets {
            let mut packet = worker_pool.get();
            packet.extend_from_slice(&(i as u32).to_be_bytes());
            packet.extend_from_slice(&[0x42; 1400]);
            // Dropping here recycles the buffer. This thread never owns
            // these handles, so the recycle queues onto this thread's
            // outbound handoff queue for the owner to scavenge.
        }
        start.elapsed()
    });

    let elapsed = worker.join().unwrap();
    println!("Produced {} packets in {:?}", num_packets, elapsed);

    // Back on the "owner" thread: subsequent get()s should scavenge the
    // worker's handoff queue instead of allocating fresh buffers.
    let recycled_by_worker = pool.stats().recycled;
    let mut scavenged = 0;
    for _ in 0..recycled_by_worker {
        let before = pool.stats().allocated;
        let _ = pool.get();
        if pool.stats().allocated == before {
            scavenged += 1;
        }
    }

    let stats = pool.stats();
    println!("\nPool statistics:");
    println!("  acquired: {}", stats.acquired);
    println!("  allocated: {}", stats.allocated);
    println!("  recycled: {}", stats.recycled);
    println!("  scavenged on owner thread: {}", scavenged);
    println!("  hit rate: {:.1}%", stats.hit_rate());

    println!("\n=== Non-Pooled Comparison ===\n");
    let start = Instant::now();
    for i in 0..num_packets {
        let mut packet: Vec<u8> = Vec::with_capacity(1500);
        packet.extend_from_slice(&(i as u32).to_be_bytes());
        packet.extend_from_slice(&[0x42; 1400]);
        drop(packet);
    }
    let elapsed_no_pool = start.elapsed();
    println!("Non-pooled time: {:?}", elapsed_no_pool);
}
