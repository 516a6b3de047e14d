//! Wrapping a callback API with `await_value`.
//!
//! The "service" answers on its own thread after a short sleep; the
//! coroutine reads like straight-line code anyway.

use costack::coroutine;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn fetch_async(key: u32, callback: impl FnOnce(String) + Send + 'static) {
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        callback(format!("value-{key}"));
    });
}

fn main() {
    env_logger::init();
    println!("=== await_callback ===\n");

    let start = Instant::now();
    let (done_tx, done_rx) = mpsc::channel();
    for key in 0..3 {
        let done_tx = done_tx.clone();
        coroutine::start(move || {
            println!("[{:>6.3}s] coroutine {key}: fetching", start.elapsed().as_secs_f64());
            let value = coroutine::await_value(|callback| {
                fetch_async(key, move |value| callback(value));
            });
            println!(
                "[{:>6.3}s] coroutine {key}: got {value:?}",
                start.elapsed().as_secs_f64()
            );
            let _ = done_tx.send(());
        });
    }
    println!("main thread is free again after starting all three");

    for _ in 0..3 {
        done_rx.recv().unwrap();
    }
    println!("\nTotal elapsed: {:?}", start.elapsed());
}
