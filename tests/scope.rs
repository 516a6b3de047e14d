use costack::coroutine;
use costack::scheduler::immediate;
use costack::{
    Channel, CoScope, Error, Future, Promise, SchedulerExt, SchedulerHandle, WorkerPool,
};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Start a coroutine in `scope` that parks forever and reports how the
/// await ended.
fn park_in(scope: &CoScope, pool: &SchedulerHandle) -> mpsc::Receiver<costack::Result<()>> {
    let (started_tx, started_rx) = mpsc::channel();
    let (tx, rx) = mpsc::channel();
    pool.start_coroutine_in(scope, move || {
        let never = Promise::<()>::new();
        started_tx.send(()).unwrap();
        tx.send(never.await_value()).unwrap();
    });
    started_rx.recv_timeout(WAIT).unwrap();
    rx
}

#[test]
fn canceling_the_scope_cancels_its_coroutines() {
    init_logger();
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("scoped", 2).unwrap());
    let scope = CoScope::new();
    let first = park_in(&scope, &pool);
    let second = park_in(&scope, &pool);
    assert!(!scope.is_empty());

    scope.cancel();
    assert!(matches!(first.recv_timeout(WAIT).unwrap(), Err(Error::Canceled)));
    assert!(matches!(second.recv_timeout(WAIT).unwrap(), Err(Error::Canceled)));
    assert!(wait_until(|| scope.is_empty()));
}

#[test]
fn dropping_the_scope_cancels_its_coroutines() {
    init_logger();
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("dropped", 1).unwrap());
    let parked = {
        let scope = CoScope::new();
        park_in(&scope, &pool)
    };
    assert!(matches!(parked.recv_timeout(WAIT).unwrap(), Err(Error::Canceled)));
}

#[test]
fn coroutine_started_in_canceled_scope_never_runs() {
    init_logger();
    let scope = CoScope::new();
    scope.cancel();
    let (tx, rx) = mpsc::channel::<()>();
    immediate().start_coroutine_in(&scope, move || tx.send(()).unwrap());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn finished_coroutines_leave_the_scope() {
    init_logger();
    let scope = CoScope::new();
    let (tx, rx) = mpsc::channel();
    immediate().start_coroutine_in(&scope, move || {
        coroutine::delay(Duration::from_millis(5)).unwrap();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(WAIT).unwrap();
    assert!(wait_until(|| scope.is_empty()));
    assert!(!scope.is_canceled());
}

#[test]
fn scope_cancels_mixed_items() {
    init_logger();
    let scope = CoScope::new();
    let channel = Channel::<u32>::default();
    let pending = Future::<u32>::spawn(|| {
        coroutine::delay(Duration::from_secs(60))?;
        Ok(1)
    });
    let done = Promise::new();
    done.succeed(2u32);

    scope.add(&channel);
    scope.add(&pending);
    scope.add(&done);

    let (tx, rx) = mpsc::channel();
    scope.when_complete(move || tx.send(()).unwrap());
    scope.cancel();

    rx.recv_timeout(WAIT).unwrap();
    assert!(channel.is_canceled());
    assert!(pending.is_canceled());
    assert_eq!(done.result().unwrap().unwrap(), 2);
    assert!(matches!(channel.offer(3), Err(costack::OfferError::Canceled(3))));
}
