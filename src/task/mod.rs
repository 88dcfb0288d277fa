//! Task execution: bounded worker pool, single-assignment handles and
//! listener dispatch

mod dispatcher;
mod handle;
mod scheduler;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use dispatcher::{Dispatcher, ImmediateDispatcher, ThreadDispatcher, TokioDispatcher, Work};
pub use handle::{Listener, TaskContext, TaskHandle, TaskId};
pub use scheduler::Scheduler;
