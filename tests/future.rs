use costack::coroutine::{self, Completion};
use costack::{Error, Future, Promise, SchedulerExt, SchedulerHandle, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn ready_future_awaits_without_suspending() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let handle = coroutine::current().unwrap();
        let value = Future::ready(Ok(7)).await_value();
        tx.send((value.unwrap(), handle.suspend_count())).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (7, 0));
}

#[test]
fn pending_future_suspends_until_completed() {
    init_logger();
    let promise = Promise::<String>::new();
    let future = promise.future();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let handle = coroutine::current().unwrap();
        let value = future.await_value().unwrap();
        tx.send((value, handle.suspend_count())).unwrap();
    });
    assert!(rx.try_recv().is_err());
    thread::spawn(move || promise.succeed("late".to_string()));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("late".to_string(), 1));
}

#[test]
fn await_timeout_gives_up() {
    init_logger();
    let promise = Promise::<u8>::new();
    let future = promise.future();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let result = future.await_timeout(Duration::from_millis(20));
        tx.send(result).unwrap();
    });
    assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Timeout)));
    // the promise is unaffected by the timed-out await
    assert!(promise.succeed(1));
}

#[test]
fn await_timeout_returns_value_in_time() {
    init_logger();
    let promise = Promise::<u8>::new();
    let future = promise.future();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        tx.send(future.await_timeout(Duration::from_secs(5))).unwrap();
    });
    promise.succeed(9);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 9);
}

#[test]
fn racing_completions_keep_the_first() {
    init_logger();
    for _ in 0..20 {
        let promise = Promise::<usize>::new();
        let wins = Arc::new(AtomicUsize::new(0));
        let racers: Vec<_> = (0..4)
            .map(|i| {
                let promise = promise.clone();
                let wins = wins.clone();
                thread::spawn(move || {
                    if promise.succeed(i) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for racer in racers {
            racer.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        let first = promise.result().unwrap().unwrap();
        assert_eq!(promise.result().unwrap().unwrap(), first);
    }
}

#[test]
fn spawned_future_chains_through_operators() {
    init_logger();
    let future = Future::spawn(|| {
        coroutine::delay(Duration::from_millis(5))?;
        Ok(20)
    })
    .map(|value| value + 1)
    .flat_map(|value| Future::ready(Ok(value * 2)));

    let (tx, rx) = mpsc::channel();
    future.when_complete(move |result| tx.send(result).unwrap());
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 42);
}

#[test]
fn panicking_task_fails_the_future() {
    init_logger();
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("panics", 1).unwrap());
    let future = pool.coroutine_future::<u32, _>(|| panic!("bad input"));
    let (tx, rx) = mpsc::channel();
    future.when_failure(move |error| tx.send(error).unwrap());
    match rx.recv_timeout(WAIT).unwrap() {
        Error::Panicked(message) => assert!(message.contains("bad input")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn canceling_coroutine_future_cancels_the_coroutine() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    let future = Future::<()>::spawn(move || {
        let never = Promise::<()>::new();
        let result = never.await_value();
        tx.send(result.clone()).unwrap();
        result
    });
    assert!(!future.is_completed());
    future.cancel();
    assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Canceled)));
    assert!(future.is_canceled());
}

#[test]
fn canceled_await_ignores_late_completion() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    let (completion_tx, completion_rx) = mpsc::channel();
    let future = Future::<u32>::spawn(move || {
        let result = coroutine::await_with(|completion: Completion<u32>| {
            completion_tx.send(completion).unwrap();
        });
        tx.send(result.clone()).unwrap();
        result
    });
    let completion = completion_rx.recv_timeout(WAIT).unwrap();
    future.cancel();
    assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Canceled)));
    assert!(!completion.complete(5));
}

#[test]
fn observers_see_matching_outcomes() {
    init_logger();
    let promise = Promise::<u8>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let success = calls.clone();
    promise.when_success(move |_| {
        success.fetch_add(1, Ordering::SeqCst);
    });
    let failure = calls.clone();
    promise.when_failure(move |_| {
        failure.fetch_add(100, Ordering::SeqCst);
    });
    let done = calls.clone();
    promise.when_done(move || {
        done.fetch_add(10, Ordering::SeqCst);
    });
    promise.succeed(1);
    assert_eq!(calls.load(Ordering::SeqCst), 11);
}
