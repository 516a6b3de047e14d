use costack::coroutine;
use costack::scheduler::immediate;
use costack::{Scheduler, SchedulerExt, SchedulerHandle, Task, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_owned()
}

#[test]
fn await_on_hops_and_returns() {
    init_logger();
    let main: SchedulerHandle = Arc::new(WorkerPool::new("main", 1).unwrap());
    let background: SchedulerHandle = Arc::new(WorkerPool::new("background", 1).unwrap());

    let hops = main.coroutine_future(move || {
        let before = thread_name();
        let inside = background.await_on(thread_name)?;
        let after = thread_name();
        coroutine::delay(Duration::from_millis(5))?;
        let later = thread_name();
        Ok(vec![before, inside, after, later])
    });

    let (tx, rx) = mpsc::channel();
    hops.when_complete(move |result| tx.send(result).unwrap());
    let names = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(names, ["main-0", "background-0", "main-0", "main-0"]);
}

#[test]
fn await_on_outside_coroutine_fails() {
    init_logger();
    assert!(immediate().await_on(|| 1).is_err());
}

#[test]
fn pool_runs_coroutines_on_its_workers() {
    init_logger();
    let pool: SchedulerHandle = Arc::new(WorkerPool::new("runs", 3).unwrap());
    let (tx, rx) = mpsc::channel();
    for _ in 0..12 {
        let tx = tx.clone();
        pool.start_coroutine(move || tx.send(thread_name()).unwrap());
    }
    for _ in 0..12 {
        let name = rx.recv_timeout(WAIT).unwrap();
        assert!(name.starts_with("runs-"), "ran on {name}");
    }
}

#[test]
fn immediate_runs_inline() {
    init_logger();
    let here = thread::current().id();
    let (tx, rx) = mpsc::channel();
    immediate().schedule(Box::new(move || tx.send(thread::current().id()).unwrap()));
    assert_eq!(rx.try_recv().unwrap(), here);
}

struct Counting {
    pool: WorkerPool,
    scheduled: Arc<AtomicUsize>,
}

impl Scheduler for Counting {
    fn schedule(&self, task: Task) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.pool.schedule(task);
    }
}

#[test]
fn every_resume_goes_through_the_scheduler() {
    init_logger();
    let scheduled = Arc::new(AtomicUsize::new(0));
    let counting: SchedulerHandle = Arc::new(Counting {
        pool: WorkerPool::new("counting", 2).unwrap(),
        scheduled: scheduled.clone(),
    });

    let future = counting.coroutine_future(|| {
        for _ in 0..3 {
            coroutine::delay(Duration::from_millis(1))?;
        }
        Ok("done")
    });
    let (tx, rx) = mpsc::channel();
    future.when_success(move |value| tx.send(value).unwrap());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "done");
    // one start plus one resume per delay
    assert!(scheduled.load(Ordering::SeqCst) >= 4);
}
