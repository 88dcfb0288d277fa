//! # taskline
//!
//! Bounded task pipeline with a caching, retrying network connector.
//!
//! ## Design Philosophy
//!
//! taskline is designed to be:
//! - **Bounded** - A fixed-ceiling worker pool; one worker always alive, the rest spawned on demand
//! - **Observable where you want it** - Listeners are delivered through a [`Dispatcher`] you choose
//! - **Cache-aware** - Requests can be served from a content-addressed file cache and report
//!   whether fresh content differs from the cached copy
//! - **Transport-agnostic** - The HTTP stack sits behind the [`Transport`] trait
//!
//! ## Quick Start
//!
//! ```no_run
//! use taskline::{Config, Connector, ConnectRequest, JsonDecoder, ThreadDispatcher};
//! use taskline::cache::ONE_HOUR;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Clone, Debug, serde::Deserialize)]
//! struct Release {
//!     tag_name: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let foreground = Arc::new(ThreadDispatcher::spawn("foreground")?);
//!     let connector = Connector::new(Config::default(), foreground)?;
//!
//!     let request = ConnectRequest::get("https://example.com/releases/latest")?
//!         .with_header("Accept", "application/json")
//!         .with_ttl(ONE_HOUR);
//!
//!     let result = connector.connect(request, JsonDecoder::<Release>::new())?;
//!     result.set_listener(|outcome| match outcome {
//!         Ok(release) => println!("latest: {}", release.tag_name),
//!         Err(e) => eprintln!("failed: {e}"),
//!     });
//!
//!     result.wait(Duration::from_secs(30))?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content-addressed file cache
pub mod cache;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Network connector
pub mod net;
/// Retry logic with exponential backoff
pub mod retry;
/// Worker pool, task handles and dispatchers
pub mod task;

use std::sync::Arc;

// Re-export commonly used types
pub use cache::{CacheKey, CachePolicy, CacheStore, FileCacheStore};
pub use config::Config;
pub use error::{ConnectError, Error, Result, TaskError, TaskResult};
pub use net::{
    AuthRecovery, BytesDecoder, ConnectRequest, ConnectResult, Connector, Decoder, HttpHeader,
    JsonDecoder, Method, ReqwestTransport, TextDecoder, Transport,
};
pub use retry::RetryPolicy;
pub use task::{
    Dispatcher, ImmediateDispatcher, Scheduler, TaskContext, TaskHandle, TaskId,
    ThreadDispatcher, TokioDispatcher,
};

/// Wait for a termination signal, then shut the scheduler down.
///
/// Queued tasks are failed with [`TaskError::ShutDown`]; running tasks are
/// allowed to finish.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use taskline::{ImmediateDispatcher, Scheduler, run_until_signal};
/// use taskline::config::SchedulerConfig;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scheduler = Arc::new(Scheduler::new(
///         SchedulerConfig::default(),
///         Arc::new(ImmediateDispatcher),
///     )?);
///
///     // ... submit work ...
///
///     run_until_signal(scheduler).await;
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(scheduler: Arc<Scheduler>) {
    wait_for_signal().await;
    tokio::task::spawn_blocking(move || scheduler.shutdown())
        .await
        .ok();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut terminate), Ok(mut interrupt)) => {
            tokio::select! {
                _ = terminate.recv() => tracing::info!("Received SIGTERM signal"),
                _ = interrupt.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Only one termination signal could be registered");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
