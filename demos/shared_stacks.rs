//! Many parked coroutines, few stacks.
//!
//! A thousand coroutines each keep a little data on their stack while they
//! wait on one gate. The dispatcher evicts parked stacks, so only a handful
//! of physical stacks ever exist.

use costack::{Config, Promise, SchedulerHandle, SharedDispatcher, WorkerPool};
use std::sync::Arc;
use std::sync::mpsc;

const NUM_COROUTINES: usize = 1000;
const NUM_THREADS: usize = 4;

fn main() {
    env_logger::init();
    println!("=== shared_stacks ===\n");

    let config = Config::from_env().with_pool_capacity(NUM_THREADS);
    println!("{config:?}\n");
    let dispatcher = SharedDispatcher::new(config);
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("worker", NUM_THREADS).unwrap());

    let gate = Promise::<u64>::new();
    let (tx, rx) = mpsc::channel();
    for i in 0..NUM_COROUTINES {
        let gate = gate.future();
        let tx = tx.clone();
        dispatcher.execute(&pool, move || {
            let scratch = [i as u64; 128];
            let bonus = gate.await_value().unwrap_or(0);
            let _ = tx.send(scratch.iter().sum::<u64>() / 128 + bonus);
        });
    }

    gate.succeed(1);
    let total: u64 = (0..NUM_COROUTINES).map(|_| rx.recv().unwrap()).sum();

    println!("coroutines:   {NUM_COROUTINES}");
    println!("checksum:     {total}");
    println!("peak stacks:  {}", dispatcher.peak_stacks());
    println!("live stacks:  {}", dispatcher.live_stacks());
    println!("idle queues:  {}", dispatcher.idle_queues());
}
