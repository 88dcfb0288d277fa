//! Bounded worker pool with a shared front/back task queue
//!
//! All queue mutation and worker bookkeeping happens under one lock. Workers
//! are plain OS threads: one is always alive, more are spawned while queued
//! work outnumbers idle workers (up to `max_workers`), and extra workers exit
//! after `keep_alive` without work.

use super::dispatcher::Dispatcher;
use super::handle::{TaskContext, TaskHandle, TaskId};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result, TaskError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Workers kept alive regardless of idleness
const MIN_WORKERS: usize = 1;

/// Type-erased queued task
trait Job: Send {
    fn id(&self) -> TaskId;
    fn run(self: Box<Self>);
    fn reject(self: Box<Self>, error: TaskError);
}

struct TaskJob<T, F> {
    handle: TaskHandle<T>,
    task: F,
}

impl<T, F> Job for TaskJob<T, F>
where
    T: Clone + Send + 'static,
    F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
{
    fn id(&self) -> TaskId {
        self.handle.id()
    }

    fn run(self: Box<Self>) {
        let TaskJob { handle, task } = *self;

        if handle.is_canceled() {
            tracing::debug!(task = %handle.id(), "Task canceled before start, skipping");
            handle.complete(Err(TaskError::Canceled));
            return;
        }

        let outcome = {
            let context = handle.context();
            match std::panic::catch_unwind(AssertUnwindSafe(|| task(&context))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    tracing::debug!(task = %handle.id(), error = %e, "Task failed");
                    Err(TaskError::from(e))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(task = %handle.id(), panic = %message, "Task panicked");
                    Err(TaskError::Panicked(message))
                }
            }
        };
        handle.complete(outcome);
    }

    fn reject(self: Box<Self>, error: TaskError) {
        self.handle.complete(Err(error));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct Queue {
    jobs: VecDeque<Box<dyn Job>>,
    shutdown: bool,
    workers: usize,
    idle: usize,
    running: usize,
    next_worker: u64,
}

struct Pool {
    queue: Mutex<Queue>,
    /// Signalled when work is queued or shutdown begins
    available: Condvar,
    /// Signalled when a worker exits
    exited: Condvar,
    config: SchedulerConfig,
    dispatcher: Arc<dyn Dispatcher>,
    next_task: AtomicU64,
}

/// Bounded worker pool executing submitted tasks
///
/// # Example
///
/// ```
/// use taskline::{ImmediateDispatcher, Scheduler};
/// use taskline::config::SchedulerConfig;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(ImmediateDispatcher)).unwrap();
/// let handle = scheduler.push_back(|_ctx| Ok(6 * 7)).unwrap();
/// assert_eq!(handle.wait(Duration::from_secs(5)).unwrap(), 42);
/// ```
pub struct Scheduler {
    pool: Arc<Pool>,
}

impl Scheduler {
    /// Create the pool and start its always-alive worker
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_workers` or `keep_alive` is zero, or
    /// [`Error::Io`] if the first worker thread cannot be spawned.
    pub fn new(config: SchedulerConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        if config.max_workers < MIN_WORKERS {
            return Err(Error::config(
                "scheduler.max_workers",
                "at least one worker is required",
            ));
        }
        if config.keep_alive.is_zero() {
            return Err(Error::config(
                "scheduler.keep_alive",
                "keep-alive must be greater than zero",
            ));
        }

        let pool = Arc::new(Pool {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                shutdown: false,
                workers: 0,
                idle: 0,
                running: 0,
                next_worker: 0,
            }),
            available: Condvar::new(),
            exited: Condvar::new(),
            config,
            dispatcher,
            next_task: AtomicU64::new(1),
        });

        {
            let mut queue = pool.queue.lock();
            spawn_worker(&pool, &mut queue)?;
        }

        Ok(Self { pool })
    }

    /// Enqueue a task at the tail
    ///
    /// Tail insertions run in submission order relative to each other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has been called.
    pub fn push_back<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        self.push(false, task)
    }

    /// Enqueue a task at the head, ahead of everything already queued
    ///
    /// Front insertions are LIFO relative to each other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has been called.
    pub fn push_front<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        self.push(true, task)
    }

    fn push<T, F>(&self, front: bool, task: F) -> Result<TaskHandle<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        let id = TaskId(self.pool.next_task.fetch_add(1, Ordering::Relaxed));
        let handle = TaskHandle::new(id, self.pool.dispatcher.clone());
        let job = Box::new(TaskJob {
            handle: handle.clone(),
            task,
        });

        let mut queue = self.pool.queue.lock();
        if queue.shutdown {
            return Err(Error::ShuttingDown);
        }

        if front {
            queue.jobs.push_front(job);
        } else {
            queue.jobs.push_back(job);
        }

        if queue.jobs.len() > queue.idle && queue.workers < self.pool.config.max_workers {
            if let Err(e) = spawn_worker(&self.pool, &mut queue) {
                tracing::warn!(error = %e, "Could not grow worker pool, task stays queued");
            }
        }
        drop(queue);

        self.pool.available.notify_one();
        tracing::trace!(task = %id, front = front, "Task queued");
        Ok(handle)
    }

    /// Number of tasks waiting for a worker
    pub fn queued_len(&self) -> usize {
        self.pool.queue.lock().jobs.len()
    }

    /// Number of tasks currently executing
    pub fn running_len(&self) -> usize {
        self.pool.queue.lock().running
    }

    /// Number of live worker threads
    pub fn worker_count(&self) -> usize {
        self.pool.queue.lock().workers
    }

    /// Ids of the queued tasks, head first
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.pool.queue.lock().jobs.iter().map(|job| job.id()).collect()
    }

    /// True once [`shutdown`](Self::shutdown) has been called
    pub fn is_shutdown(&self) -> bool {
        self.pool.queue.lock().shutdown
    }

    /// Stop accepting work and release the pool
    ///
    /// Queued tasks are failed with [`TaskError::ShutDown`] so their waiters
    /// wake up. Running tasks finish normally; workers exit afterwards.
    pub fn shutdown(&self) {
        let drained: Vec<Box<dyn Job>> = {
            let mut queue = self.pool.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            queue.jobs.drain(..).collect()
        };
        self.pool.available.notify_all();

        tracing::info!(rejected = drained.len(), "Scheduler shutting down");
        for job in drained {
            job.reject(TaskError::ShutDown);
        }
    }

    /// Wait until every worker thread has exited after [`shutdown`](Self::shutdown)
    ///
    /// Returns false if workers are still alive when `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.pool.queue.lock();
        while queue.workers > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .pool
                        .exited
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        return queue.workers == 0;
                    }
                }
                None => self.pool.exited.wait(&mut queue),
            }
        }
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.pool.queue.lock();
        f.debug_struct("Scheduler")
            .field("workers", &queue.workers)
            .field("idle", &queue.idle)
            .field("running", &queue.running)
            .field("queued", &queue.jobs.len())
            .field("shutdown", &queue.shutdown)
            .finish()
    }
}

/// Spawn one worker; the caller holds the queue lock
fn spawn_worker(pool: &Arc<Pool>, queue: &mut MutexGuard<'_, Queue>) -> Result<()> {
    let worker_id = queue.next_worker;
    queue.next_worker += 1;
    queue.workers += 1;

    let worker_pool = pool.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("{}-{}", pool.config.thread_name, worker_id))
        .spawn(move || worker_loop(worker_pool, worker_id));

    match spawned {
        Ok(_) => {
            tracing::debug!(worker = worker_id, workers = queue.workers, "Worker spawned");
            Ok(())
        }
        Err(e) => {
            queue.workers -= 1;
            Err(Error::Io(e))
        }
    }
}

fn worker_loop(pool: Arc<Pool>, worker_id: u64) {
    let keep_alive = pool.config.keep_alive;
    let mut queue = pool.queue.lock();

    loop {
        if let Some(job) = queue.jobs.pop_front() {
            queue.running += 1;
            let id = job.id();
            // Listeners delivered inline can still panic after the task itself
            let survived = MutexGuard::unlocked(&mut queue, move || {
                std::panic::catch_unwind(AssertUnwindSafe(move || job.run())).is_ok()
            });
            queue.running -= 1;
            if !survived {
                tracing::error!(
                    worker = worker_id,
                    task = %id,
                    "Listener panicked on worker thread"
                );
            }
            continue;
        }

        if queue.shutdown {
            break;
        }

        queue.idle += 1;
        let timed_out = if queue.workers > MIN_WORKERS {
            pool.available.wait_for(&mut queue, keep_alive).timed_out()
        } else {
            pool.available.wait(&mut queue);
            false
        };
        queue.idle -= 1;

        if timed_out && queue.jobs.is_empty() && queue.workers > MIN_WORKERS {
            tracing::debug!(worker = worker_id, "Idle worker reaped after keep-alive");
            break;
        }
    }

    queue.workers -= 1;
    drop(queue);
    pool.exited.notify_all();
    tracing::trace!(worker = worker_id, "Worker exited");
}
