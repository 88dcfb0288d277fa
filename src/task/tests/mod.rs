use super::*;
use crate::config::SchedulerConfig;
use crate::error::{Error, TaskError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn scheduler(max_workers: usize) -> Scheduler {
    scheduler_with(max_workers, Arc::new(ImmediateDispatcher))
}

fn scheduler_with(max_workers: usize, dispatcher: Arc<dyn Dispatcher>) -> Scheduler {
    let config = SchedulerConfig {
        max_workers,
        thread_name: "test-worker".to_string(),
        ..SchedulerConfig::default()
    };
    Scheduler::new(config, dispatcher).unwrap()
}

/// Occupies a worker until the returned sender is dropped
fn block_worker(scheduler: &Scheduler) -> (Sender<()>, TaskHandle<()>) {
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let handle = scheduler
        .push_back(move |_ctx| {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
            Ok(())
        })
        .unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    (release_tx, handle)
}

/// Dispatcher that counts posts and runs them inline
#[derive(Default)]
struct CountingDispatcher {
    posts: AtomicUsize,
}

impl Dispatcher for CountingDispatcher {
    fn post(&self, work: Work) {
        self.posts.fetch_add(1, Ordering::SeqCst);
        work();
    }
}

fn record_order(
    scheduler: &Scheduler,
    order: &Arc<Mutex<Vec<&'static str>>>,
    label: &'static str,
    front: bool,
) -> TaskHandle<()> {
    let order = order.clone();
    let task = move |_: &TaskContext<'_>| -> crate::Result<()> {
        order.lock().push(label);
        Ok(())
    };
    if front {
        scheduler.push_front(task).unwrap()
    } else {
        scheduler.push_back(task).unwrap()
    }
}

#[test]
fn test_hundred_tasks_never_exceed_max_workers() {
    let scheduler = scheduler(4);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let threads = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            let threads = threads.clone();
            scheduler
                .push_back(move |_ctx| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    threads.lock().insert(std::thread::current().id());
                    std::thread::sleep(Duration::from_millis(2));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
                .unwrap()
        })
        .collect();

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.wait(WAIT).unwrap(), i);
        assert!(handle.is_finished());
    }

    assert!(peak.load(Ordering::SeqCst) <= 4, "more than 4 tasks ran at once");
    let distinct = threads.lock().len();
    assert!(
        (1..=4).contains(&distinct),
        "expected at most 4 worker threads, saw {}",
        distinct
    );
    assert!(scheduler.worker_count() <= 4);
}

#[test]
fn test_push_back_preserves_submission_order() {
    let scheduler = scheduler(1);
    let (release, _gate) = block_worker(&scheduler);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|label| record_order(&scheduler, &order, label, false))
        .collect();
    assert_eq!(scheduler.queued_len(), 4);

    drop(release);
    for handle in &handles {
        handle.wait(WAIT).unwrap();
    }
    assert_eq!(*order.lock(), vec!["a", "b", "c", "d"]);
}

#[test]
fn test_push_front_runs_ahead_of_tail_in_lifo_order() {
    let scheduler = scheduler(1);
    let (release, _gate) = block_worker(&scheduler);
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = record_order(&scheduler, &order, "a", false);
    let b = record_order(&scheduler, &order, "b", false);
    let c = record_order(&scheduler, &order, "c", true);
    let d = record_order(&scheduler, &order, "d", true);

    assert_eq!(scheduler.queued_ids(), vec![d.id(), c.id(), a.id(), b.id()]);

    drop(release);
    for handle in [&a, &b, &c, &d] {
        handle.wait(WAIT).unwrap();
    }
    assert_eq!(*order.lock(), vec!["d", "c", "a", "b"]);
}

#[test]
fn test_cancel_before_dequeue_skips_task() {
    let scheduler = scheduler(1);
    let (release, _gate) = block_worker(&scheduler);
    let ran = Arc::new(AtomicBool::new(false));

    let ran_in_task = ran.clone();
    let handle = scheduler
        .push_back(move |_ctx| {
            ran_in_task.store(true, Ordering::SeqCst);
            Ok(1)
        })
        .unwrap();
    handle.cancel();
    assert!(handle.is_canceled());

    drop(release);
    let outcome = handle.wait(WAIT);
    assert!(matches!(outcome, Err(TaskError::Canceled)), "got {:?}", outcome);
    assert!(!ran.load(Ordering::SeqCst), "canceled task must not run");
}

#[test]
fn test_cancel_after_start_still_records_outcome() {
    let scheduler = scheduler(2);
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

    let handle = scheduler
        .push_back(move |ctx| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            // Keeps running even though cancellation was requested
            Ok(ctx.is_canceled())
        })
        .unwrap();

    started_rx.recv_timeout(WAIT).unwrap();
    handle.cancel();
    release_tx.send(()).unwrap();

    assert!(handle.wait(WAIT).unwrap(), "task should observe the cancel flag");
}

#[test]
fn test_late_listener_delivered_once_through_dispatcher() {
    let dispatcher = Arc::new(CountingDispatcher::default());
    let scheduler = scheduler_with(2, dispatcher.clone());

    let handle = scheduler.push_back(|_ctx| Ok("done".to_string())).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), "done");
    assert_eq!(dispatcher.posts.load(Ordering::SeqCst), 0);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));
    {
        let calls = calls.clone();
        let seen = seen.clone();
        handle.set_listener(move |outcome| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen.lock() = Some(outcome);
        });
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.posts.load(Ordering::SeqCst), 1);
    assert!(matches!(seen.lock().take(), Some(Ok(ref s)) if s == "done"));
}

#[test]
fn test_early_listener_delivered_once_on_completion() {
    let dispatcher = Arc::new(CountingDispatcher::default());
    let scheduler = scheduler_with(1, dispatcher.clone());
    let (release, _gate) = block_worker(&scheduler);

    let handle = scheduler.push_back(|_ctx| Ok(5)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    handle.set_listener(move |outcome| tx.send(outcome).unwrap());
    assert_eq!(dispatcher.posts.load(Ordering::SeqCst), 0);

    drop(release);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 5);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    handle.join().unwrap();
}

#[test]
fn test_listener_runs_on_foreground_thread() {
    let foreground = Arc::new(ThreadDispatcher::spawn("test-foreground").unwrap());
    let scheduler = scheduler_with(2, foreground.clone());
    let (tx, rx) = crossbeam_channel::bounded(1);

    let handle = scheduler.push_back(|_ctx| Ok(())).unwrap();
    handle.set_listener(move |_| {
        let name = std::thread::current().name().map(str::to_string);
        tx.send(name).unwrap();
    });

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap().as_deref(),
        Some("test-foreground")
    );
}

#[test]
fn test_wait_times_out_without_outcome() {
    let scheduler = scheduler(1);
    let (release, gate) = block_worker(&scheduler);

    let started = Instant::now();
    let outcome = gate.wait(Duration::from_millis(30));
    assert!(matches!(outcome, Err(TaskError::Timeout(_))), "got {:?}", outcome);
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(!gate.is_finished());

    drop(release);
    gate.join().unwrap();
}

#[test]
fn test_empty_success_is_not_a_timeout() {
    let scheduler = scheduler(1);
    let handle = scheduler.push_back(|_ctx| Ok(None::<u32>)).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), None);
}

#[test]
fn test_panic_becomes_terminal_error() {
    let scheduler = scheduler(1);

    let handle = scheduler
        .push_back(|_ctx| -> crate::Result<u32> { panic!("task blew up") })
        .unwrap();

    match handle.wait(WAIT) {
        Err(TaskError::Panicked(message)) => assert!(message.contains("task blew up")),
        other => panic!("expected Panicked, got {:?}", other),
    }

    // The worker survives the panic
    let next = scheduler.push_back(|_ctx| Ok(1)).unwrap();
    assert_eq!(next.wait(WAIT).unwrap(), 1);
}

#[test]
fn test_task_errors_are_captured() {
    let scheduler = scheduler(1);

    let failed = scheduler
        .push_back(|_ctx| -> crate::Result<()> { Err(Error::Other("nope".into())) })
        .unwrap();
    let err = failed.wait(WAIT).unwrap_err();
    assert!(matches!(err.error(), Some(Error::Other(msg)) if msg == "nope"));

    let canceled = scheduler
        .push_back(|_ctx| -> crate::Result<()> { Err(Error::Canceled) })
        .unwrap();
    assert!(canceled.wait(WAIT).unwrap_err().is_canceled());
}

#[test]
fn test_outcome_is_assigned_once() {
    let scheduler = scheduler(1);
    let handle = scheduler.push_back(|_ctx| Ok(1)).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), 1);

    assert!(!handle.complete(Ok(2)), "second completion must be ignored");
    assert_eq!(handle.try_outcome().unwrap().unwrap(), 1);
}

#[test]
fn test_shutdown_rejects_queued_and_new_work() {
    let scheduler = scheduler(1);
    let (release, gate) = block_worker(&scheduler);
    let queued = scheduler.push_back(|_ctx| Ok(1)).unwrap();

    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
    assert!(matches!(queued.wait(WAIT), Err(TaskError::ShutDown)));
    assert!(matches!(
        scheduler.push_back(|_ctx| Ok(2)),
        Err(Error::ShuttingDown)
    ));

    // Running work finishes normally
    drop(release);
    gate.wait(WAIT).unwrap();
    assert!(scheduler.await_termination(WAIT));
    assert_eq!(scheduler.worker_count(), 0);
}

#[test]
fn test_idle_workers_reaped_after_keep_alive() {
    let config = SchedulerConfig {
        max_workers: 4,
        keep_alive: Duration::from_millis(50),
        thread_name: "test-reap".to_string(),
    };
    let scheduler = Scheduler::new(config, Arc::new(ImmediateDispatcher)).unwrap();

    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::unbounded();
    let (started_tx, started_rx) = crossbeam_channel::unbounded::<()>();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let release_rx = release_rx.clone();
            let started_tx = started_tx.clone();
            scheduler
                .push_back(move |_ctx| {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.recv();
                    Ok(())
                })
                .unwrap()
        })
        .collect();

    for _ in 0..4 {
        started_rx.recv_timeout(WAIT).unwrap();
    }
    assert_eq!(scheduler.worker_count(), 4);
    assert_eq!(scheduler.running_len(), 4);

    drop(release_tx);
    for handle in &handles {
        handle.wait(WAIT).unwrap();
    }

    let deadline = Instant::now() + WAIT;
    while scheduler.worker_count() > 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(scheduler.worker_count(), 1, "one worker must stay alive");
}

#[test]
fn test_zero_workers_rejected() {
    let config = SchedulerConfig {
        max_workers: 0,
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        Scheduler::new(config, Arc::new(ImmediateDispatcher)),
        Err(Error::Config { .. })
    ));
}

#[test]
fn test_zero_keep_alive_rejected() {
    let config = SchedulerConfig {
        keep_alive: Duration::ZERO,
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        Scheduler::new(config, Arc::new(ImmediateDispatcher)),
        Err(Error::Config { .. })
    ));
}

#[test]
fn test_listener_panic_on_worker_is_contained() {
    let scheduler = scheduler(1);
    let (release_tx, blocker) = block_worker(&scheduler);

    let queued = scheduler.push_back(|_ctx| Ok("queued")).unwrap();
    queued.set_listener(|_outcome| panic!("listener failure"));
    drop(release_tx);
    blocker.wait(WAIT).unwrap();
    assert_eq!(queued.wait(WAIT).unwrap(), "queued");

    let after = scheduler.push_back(|_ctx| Ok("after")).unwrap();
    assert_eq!(after.wait(WAIT).unwrap(), "after");
    assert_eq!(scheduler.worker_count(), 1);
    assert_eq!(scheduler.running_len(), 0);
}

#[test]
fn test_await_termination_with_unbounded_timeout() {
    let scheduler = scheduler(2);
    scheduler.push_back(|_ctx| Ok(())).unwrap().wait(WAIT).unwrap();

    scheduler.shutdown();
    assert!(scheduler.await_termination(Duration::MAX));
}

#[tokio::test]
async fn test_completion_awaits_from_async_code() {
    let scheduler = scheduler(2);
    let handle = scheduler
        .push_back(|_ctx| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(99)
        })
        .unwrap();

    let value = tokio::time::timeout(WAIT, handle.completion())
        .await
        .expect("completion timed out")
        .unwrap();
    assert_eq!(value, 99);
}
