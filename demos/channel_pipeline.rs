//! A three-stage pipeline over bounded channels.
//!
//! The producer runs ahead until the small buffer fills, then suspends
//! until the squarer catches up.

use costack::{Channel, SchedulerExt, SchedulerHandle, WorkerPool};
use std::sync::{Arc, mpsc};

const NUM_ITEMS: u64 = 20;

fn main() {
    env_logger::init();
    println!("=== channel_pipeline ===\n");

    let pool: SchedulerHandle = Arc::new(WorkerPool::new("stage", 3).unwrap());
    let (numbers_tx, numbers_rx) = Channel::with_capacity(2).split();
    let (squares_tx, squares_rx) = Channel::with_capacity(2).split();

    pool.start_coroutine(move || {
        for n in 1..=NUM_ITEMS {
            if numbers_tx.await_send(n).is_err() {
                return;
            }
            println!("produced {n}");
        }
        numbers_tx.close();
    });

    pool.start_coroutine(move || {
        for n in &numbers_rx {
            if squares_tx.await_send(n * n).is_err() {
                return;
            }
        }
        squares_tx.close();
    });

    let (done_tx, done_rx) = mpsc::channel();
    pool.start_coroutine(move || {
        let squares = squares_rx.map(|square| (square, format!("{square:>4}")));
        let mut sum = 0;
        for (square, label) in &squares {
            println!("              consumed {label}");
            sum += square;
        }
        let _ = done_tx.send(sum);
    });

    let sum = done_rx.recv().unwrap();
    println!("\nsum of squares 1..={NUM_ITEMS}: {sum}");
}
