//! Moving one coroutine between schedulers.
//!
//! The coroutine lives on a single "main" worker, does its heavy lifting on
//! the "background" pool through `await_on`, and comes back.

use costack::{SchedulerExt, SchedulerHandle, WorkerPool, coroutine};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

fn where_am_i(step: &str) {
    println!("{step:<18} on {}", thread::current().name().unwrap_or("?"));
}

fn main() {
    env_logger::init();
    println!("=== scheduler_hop ===\n");

    let main_loop: SchedulerHandle = Arc::new(WorkerPool::new("main", 1).unwrap());
    let background: SchedulerHandle = Arc::new(WorkerPool::new("background", 2).unwrap());

    let result = main_loop.coroutine_future(move || {
        where_am_i("start");
        let primes = background.await_on(|| {
            where_am_i("counting primes");
            (2..50_000u32)
                .filter(|n| (2..).take_while(|d| d * d <= *n).all(|d| n % d != 0))
                .count()
        })?;
        where_am_i("back");
        coroutine::delay(Duration::from_millis(10))?;
        where_am_i("after delay");
        Ok(primes)
    });

    let (tx, rx) = mpsc::channel();
    result.when_complete(move |result| {
        let _ = tx.send(result);
    });
    match rx.recv().unwrap() {
        Ok(primes) => println!("\n{primes} primes below 50000"),
        Err(error) => println!("\nfailed: {error}"),
    }
}
