//! Dispatcher port: where listener callbacks are delivered
//!
//! The scheduler decides where work *runs*; a [`Dispatcher`] decides where
//! completion is *observed*. Every listener delivery goes through
//! [`Dispatcher::post`], regardless of whether the handle finished before or
//! after the listener was registered.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;

/// Work posted to a dispatcher
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for listener callbacks
pub trait Dispatcher: Send + Sync {
    /// Schedule `work` to run on this dispatcher's context
    fn post(&self, work: Work);
}

/// Runs posted work immediately on the posting thread
///
/// Useful in tests and for callers that do not care which thread observes
/// completion. Listener delivery happens on the worker thread that finished
/// the task, or on the thread calling `set_listener` for an already finished
/// handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn post(&self, work: Work) {
        work();
    }
}

/// A dedicated foreground thread that runs posted work in order
///
/// Plays the role of a UI/main loop: all listeners posted here run serially on
/// one named thread.
pub struct ThreadDispatcher {
    sender: Mutex<Option<Sender<Work>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadDispatcher {
    /// Spawn the foreground thread
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to spawn the thread.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Work>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_mailbox(receiver))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop accepting work, run what is already posted, and join the thread
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("Dispatcher thread panicked");
            }
        }
    }
}

fn run_mailbox(receiver: Receiver<Work>) {
    while let Ok(work) = receiver.recv() {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)).is_err() {
            tracing::error!("Listener panicked on dispatcher thread");
        }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn post(&self, work: Work) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(work).is_err() {
                    tracing::warn!("Dispatcher thread gone, dropping listener delivery");
                }
            }
            None => tracing::warn!("Dispatcher shut down, dropping listener delivery"),
        }
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Delivers listeners on a tokio runtime's blocking pool
///
/// Lets async applications observe completions on their runtime without
/// blocking a core worker.
#[derive(Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

impl TokioDispatcher {
    /// Dispatch onto the given runtime
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Dispatch onto the runtime of the calling context
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Dispatcher for TokioDispatcher {
    fn post(&self, work: Work) {
        drop(self.handle.spawn_blocking(work));
    }
}
