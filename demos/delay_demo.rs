//! Sleeping coroutines do not hold a worker.
//!
//! Ten coroutines each `delay` for 100ms on two worker threads. With
//! `thread::sleep` this would take half a second.

use costack::{SchedulerExt, SchedulerHandle, WorkerPool, coroutine};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

const NUM_THREADS: usize = 2;
const NUM_TASKS: usize = 10;
const SLEEP_MS: u64 = 100;

fn main() {
    env_logger::init();
    println!("=== delay_demo ===\n");
    println!("{NUM_TASKS} tasks sleeping {SLEEP_MS}ms each on {NUM_THREADS} workers\n");

    let pool: SchedulerHandle = Arc::new(WorkerPool::new("worker", NUM_THREADS).unwrap());
    let start = Instant::now();
    let (tx, rx) = mpsc::channel();

    for i in 0..NUM_TASKS {
        let tx = tx.clone();
        pool.start_coroutine(move || {
            println!("[{:>6.3}s] Task {i} starting sleep", start.elapsed().as_secs_f64());
            if let Err(error) = coroutine::delay(Duration::from_millis(SLEEP_MS)) {
                println!("Task {i} interrupted: {error}");
            }
            println!("[{:>6.3}s] Task {i} woke up", start.elapsed().as_secs_f64());
            let _ = tx.send(());
        });
    }
    for _ in 0..NUM_TASKS {
        rx.recv().unwrap();
    }

    println!("\nTotal elapsed: {:?}", start.elapsed());
    println!(
        "With thread::sleep: ~{}ms ({NUM_TASKS} tasks / {NUM_THREADS} workers * {SLEEP_MS}ms)",
        NUM_TASKS / NUM_THREADS * SLEEP_MS as usize,
    );
}
