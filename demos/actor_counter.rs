//! An actor owning its state behind a channel.
//!
//! Several coroutines bump a counter concurrently; the actor processes one
//! message at a time, so no lock is needed around `total`.

use costack::{BufferType, Promise, Receiver, SchedulerExt, SchedulerHandle, WorkerPool};
use std::sync::{Arc, mpsc};

const NUM_CLIENTS: usize = 8;
const INCREMENTS: u64 = 1000;

enum Message {
    Increment,
    Get(Promise<u64>),
}

fn main() {
    env_logger::init();
    println!("=== actor_counter ===\n");

    let pool: SchedulerHandle = Arc::new(WorkerPool::new("actor", 4).unwrap());
    let counter = pool.actor(BufferType::Buffered(16), |inbox: Receiver<Message>| {
        let mut total = 0;
        for message in &inbox {
            match message {
                Message::Increment => total += 1,
                Message::Get(reply) => {
                    reply.succeed(total);
                }
            }
        }
        println!("actor: inbox closed at {total}");
    });

    let (tx, rx) = mpsc::channel();
    for client in 0..NUM_CLIENTS {
        let counter = counter.clone();
        let tx = tx.clone();
        pool.start_coroutine(move || {
            for _ in 0..INCREMENTS {
                if counter.await_send(Message::Increment).is_err() {
                    break;
                }
            }
            println!("client {client} done");
            let _ = tx.send(());
        });
    }
    for _ in 0..NUM_CLIENTS {
        rx.recv().unwrap();
    }

    let reply = Promise::new();
    let total = pool.coroutine_future({
        let counter = counter.clone();
        let reply = reply.clone();
        move || {
            counter.await_send(Message::Get(reply.clone()))?;
            reply.await_value()
        }
    });
    let (tx, rx) = mpsc::channel();
    total.when_complete(move |result| {
        let _ = tx.send(result);
    });
    match rx.recv().unwrap() {
        Ok(total) => println!("\ntotal: {total} (expected {})", NUM_CLIENTS as u64 * INCREMENTS),
        Err(error) => println!("\nfailed: {error}"),
    }
    counter.close();
}
