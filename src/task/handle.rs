//! Single-assignment task handles

use super::dispatcher::Dispatcher;
use crate::error::{TaskError, TaskResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Identifier assigned to each submitted task, unique per scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Completion callback receiving the terminal outcome
pub type Listener<T> = Box<dyn FnOnce(TaskResult<T>) + Send + 'static>;

/// View of the running task handed to the task body
///
/// Long-running tasks may poll [`TaskContext::is_canceled`] between steps;
/// nothing forces them to.
pub struct TaskContext<'a> {
    id: TaskId,
    canceled: &'a AtomicBool,
}

impl TaskContext<'_> {
    /// Id of the running task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once `cancel()` has been called on the task's handle
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

struct State<T> {
    outcome: Option<TaskResult<T>>,
    listener: Option<Listener<T>>,
}

struct Shared<T> {
    id: TaskId,
    canceled: AtomicBool,
    /// Guards the outcome and the pending listener
    state: Mutex<State<T>>,
    /// Separate wait condition so blocked waiters never hold `state`
    done: Mutex<bool>,
    done_cond: Condvar,
    notify: tokio::sync::Notify,
    dispatcher: Arc<dyn Dispatcher>,
}

/// Handle to one submitted unit of work
///
/// The outcome is assigned exactly once by the worker that runs (or rejects)
/// the task and never changes afterwards. Handles are cheap to clone; all
/// clones observe the same outcome.
pub struct TaskHandle<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("canceled", &self.is_canceled())
            .field("finished", &self.inner.state.lock().outcome.is_some())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            inner: Arc::new(Shared {
                id,
                canceled: AtomicBool::new(false),
                state: Mutex::new(State {
                    outcome: None,
                    listener: None,
                }),
                done: Mutex::new(false),
                done_cond: Condvar::new(),
                notify: tokio::sync::Notify::new(),
                dispatcher,
            }),
        }
    }

    /// Id of the task
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Request cancellation
    ///
    /// Cooperative: a task that has not started yet is failed with
    /// [`TaskError::Canceled`] instead of running. A task that is already
    /// running is not interrupted and its outcome is still recorded.
    pub fn cancel(&self) {
        if !self.inner.canceled.swap(true, Ordering::AcqRel) {
            tracing::debug!(task = %self.inner.id, "Cancel requested");
        }
    }

    /// True once [`cancel`](Self::cancel) has been called
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// True once the task has a terminal outcome
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub(crate) fn context(&self) -> TaskContext<'_> {
        TaskContext {
            id: self.inner.id,
            canceled: &self.inner.canceled,
        }
    }
}

impl<T: Clone + Send + 'static> TaskHandle<T> {
    /// The terminal outcome, if the task has finished
    pub fn try_outcome(&self) -> Option<TaskResult<T>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Register a completion listener
    ///
    /// If the task already finished, the listener is posted to the dispatcher
    /// right away with the recorded outcome. Otherwise it is stored and posted
    /// when the task finishes, replacing any listener registered earlier that
    /// has not been delivered yet. Either way a listener runs at most once and
    /// always through the dispatcher.
    pub fn set_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(TaskResult<T>) + Send + 'static,
    {
        let ready = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_none() {
                state.listener = Some(Box::new(listener));
                return self;
            }
            state.outcome.clone()
        };
        if let Some(outcome) = ready {
            self.deliver(Box::new(listener), outcome);
        }
        self
    }

    /// Block the calling thread until the task finishes or `timeout` elapses
    ///
    /// Must not be called from a worker of the scheduler that runs this task
    /// while that is the only free worker, or the wait can only time out.
    ///
    /// # Errors
    ///
    /// Returns the task's terminal error, or [`TaskError::Timeout`] if the
    /// deadline passes first.
    pub fn wait(&self, timeout: Duration) -> TaskResult<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.join();
        };

        {
            let mut done = self.inner.done.lock();
            while !*done {
                if self
                    .inner
                    .done_cond
                    .wait_until(&mut done, deadline)
                    .timed_out()
                    && !*done
                {
                    return Err(TaskError::Timeout(timeout));
                }
            }
        }

        self.try_outcome()
            .unwrap_or(Err(TaskError::Timeout(timeout)))
    }

    /// Block the calling thread until the task finishes
    pub fn join(&self) -> TaskResult<T> {
        {
            let mut done = self.inner.done.lock();
            while !*done {
                self.inner.done_cond.wait(&mut done);
            }
        }
        self.try_outcome().unwrap_or(Err(TaskError::ShutDown))
    }

    /// Wait for the task from async code without blocking the runtime
    pub async fn completion(&self) -> TaskResult<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Record the terminal outcome. Returns false if one was already recorded.
    pub(crate) fn complete(&self, outcome: TaskResult<T>) -> bool {
        let listener = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            state.listener.take()
        };

        *self.inner.done.lock() = true;
        self.inner.done_cond.notify_all();
        self.inner.notify.notify_waiters();

        if let Some(listener) = listener {
            self.deliver(listener, outcome);
        }
        true
    }

    fn deliver(&self, listener: Listener<T>, outcome: TaskResult<T>) {
        self.inner
            .dispatcher
            .post(Box::new(move || listener(outcome)));
    }
}
