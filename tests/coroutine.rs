use costack::coroutine::{self, Completion};
use costack::{Error, SchedulerExt, SchedulerHandle, WorkerPool};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn await_value_resumes_with_callback_result() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let value: u32 = coroutine::await_value(|callback| {
            thread::spawn(move || callback(42));
        })
        .unwrap();
        tx.send(value).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 42);
}

#[test]
fn await_adapters_carry_every_argument() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        coroutine::await_unit(|callback| {
            thread::spawn(move || callback());
        })
        .unwrap();
        let pair = coroutine::await_pair(|callback| {
            thread::spawn(move || callback(1u8, "two"));
        })
        .unwrap();
        let triple = coroutine::await_triple(|callback| callback(3u8, 4u16, 5u32)).unwrap();
        tx.send((pair, triple)).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ((1, "two"), (3, 4, 5)));
}

#[test]
fn concurrent_awaits_never_cross_deliver() {
    init_logger();
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("cross", 4).unwrap());
    let (tx, rx) = mpsc::channel();
    for i in 0..64u64 {
        let tx = tx.clone();
        pool.start_coroutine(move || {
            let doubled: u64 = coroutine::await_value(|callback| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(i % 7));
                    callback(i * 2);
                });
            })
            .unwrap();
            tx.send((i, doubled)).unwrap();
        });
    }
    let mut results: Vec<_> = (0..64).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    results.sort();
    for (i, (index, doubled)) in results.into_iter().enumerate() {
        assert_eq!(index, i as u64);
        assert_eq!(doubled, index * 2);
    }
}

#[test]
fn await_outside_coroutine_fails_fast() {
    init_logger();
    assert!(!coroutine::is_inside());
    assert!(matches!(
        coroutine::await_unit(|_| {}),
        Err(Error::CalledOutsideCoroutine)
    ));
    assert!(matches!(
        coroutine::delay(Duration::from_millis(1)),
        Err(Error::CalledOutsideCoroutine)
    ));
    assert!(coroutine::current().is_err());
}

#[test]
fn cancel_is_idempotent() {
    init_logger();
    let stash: Arc<Mutex<Vec<Completion<()>>>> = Arc::default();
    let (handle_tx, handle_rx) = mpsc::channel();
    let (result_tx, result_rx) = mpsc::channel();
    let parked = stash.clone();
    coroutine::start(move || {
        handle_tx.send(coroutine::current().unwrap()).unwrap();
        let result = coroutine::await_with(|completion: Completion<()>| {
            parked.lock().unwrap().push(completion);
        });
        result_tx.send(result).unwrap();
    });
    let handle = handle_rx.recv_timeout(WAIT).unwrap();
    assert!(!handle.is_canceled());
    handle.cancel();
    handle.cancel();
    handle.cancel();
    assert!(matches!(
        result_rx.recv_timeout(WAIT).unwrap(),
        Err(Error::Canceled)
    ));
    assert!(result_rx.recv_timeout(Duration::from_millis(50)).is_err());

    // a late completion is ignored, so is canceling a finished coroutine
    let completion = stash.lock().unwrap().pop().unwrap();
    assert!(!completion.complete(()));
    handle.cancel();
    assert!(handle.is_canceled());
}

#[test]
fn completing_before_suspension_does_not_suspend() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let handle = coroutine::current().unwrap();
        let value = coroutine::await_value(|callback| callback("sync")).unwrap();
        tx.send((value, handle.suspend_count())).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("sync", 0));
}

#[test]
fn delay_waits_at_least_the_duration() {
    init_logger();
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || {
        let started = Instant::now();
        coroutine::delay(Duration::from_millis(30)).unwrap();
        tx.send(started.elapsed()).unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap() >= Duration::from_millis(30));
}

#[test]
fn deep_stack_survives_suspension() {
    init_logger();
    fn recurse(depth: u32) -> u64 {
        let frame = [u64::from(depth); 16];
        let below = if depth == 0 {
            coroutine::await_value(|callback| {
                thread::spawn(move || callback(1u64));
            })
            .unwrap()
        } else {
            recurse(depth - 1)
        };
        below + frame.iter().sum::<u64>()
    }

    let (tx, rx) = mpsc::channel();
    for _ in 0..4 {
        let tx = tx.clone();
        coroutine::start(move || tx.send(recurse(64)).unwrap());
    }
    let expected = 1 + (0..=64u64).map(|depth| depth * 16).sum::<u64>();
    for _ in 0..4 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), expected);
    }
}

#[test]
fn panicking_body_does_not_poison_the_runtime() {
    init_logger();
    coroutine::start(|| panic!("boom"));
    let (tx, rx) = mpsc::channel();
    coroutine::start(move || tx.send("still alive").unwrap());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "still alive");
}
