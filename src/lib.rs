//! # transistor
//!
//! Concurrent web-scraping runtime: named trackers of search tasks, work groups
//! of scrapers rendering pages through a Splash-compatible endpoint, and a
//! manager running them in one bounded pool.
//!
//! ## Moving parts
//!
//! - A [`TaskProvider`] supplies tasks: a finite [`StatefulBook`] or a
//!   broker-fed [`StreamQueue`]
//! - A [`WorkGroup`] builds the workers serving the tracker with its name
//! - Each worker drives one [`Scraper`](scraper::Scraper) per task through a
//!   [`RetryableSession`](session::RetryableSession), then loads and exports
//!   the items
//! - The [`Manager`] hands tasks from tracker queues to idle workers until the
//!   trackers run dry, every worker has stopped, or shutdown is requested
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use transistor::{
//!     Config, Manager, StatefulBook, WorkGroup,
//!     export::JsonLinesExporter,
//!     scraper::SplashScraperFactory,
//!     session::HttpTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let transport = Arc::new(HttpTransport::new(&config.session.clone().with_env_credentials())?);
//!     let factory = Arc::new(
//!         SplashScraperFactory::new(transport, config.session_retry.clone())
//!             .searchurl("https://books.toscrape.com/search?q={task}"),
//!     );
//!
//!     let group = WorkGroup::builder("books.toscrape.com", 4, factory)
//!         .exporter(Arc::new(JsonLinesExporter::new("books.jsonl")))
//!         .build()?;
//!     let book = StatefulBook::fanout(["books.toscrape.com"], ["Soumission", "Sharp Objects"]);
//!
//!     let manager = Manager::new("books_job", book.into(), vec![group], config.manager, None)?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = manager.run().await?;
//!     println!("completed {} tasks", summary.tasks_completed());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Message brokers feeding stream runs
pub mod broker;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Item loading and exporting
pub mod export;
/// Run orchestration
pub mod manager;
/// Task providers
pub mod provider;
/// Per-tracker task queues
pub mod queue;
/// Retry logic and transient fault detection
pub mod retry;
/// Per-task scrapers
pub mod scraper;
/// Rendering sessions
pub mod session;
/// Core types and events
pub mod types;
/// Worker drive loop
pub mod worker;
/// Work groups
pub mod workgroup;

// Re-export commonly used types
pub use config::{Config, ManagerConfig, RenderTimeout, RetryConfig, SessionConfig, SessionRetryConfig};
pub use error::{Error, Result};
pub use manager::{ConsumerReport, Manager, RunSummary};
pub use provider::{StatefulBook, StreamQueue, TaskProvider, Tracker};
pub use types::{Event, JobId, StopReason, WorkerId};
pub use worker::{WorkerHooks, WorkerReport};
pub use workgroup::{WorkGroup, WorkerList};

/// Run the manager until it finishes or a termination signal arrives.
///
/// On a signal the manager's shutdown token is cancelled: no further tasks are
/// handed out, tasks already held by workers run to completion, and the
/// summary is returned with `cancelled` set.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use transistor::{Manager, run_with_shutdown};
///
/// async fn serve(manager: Manager) -> transistor::Result<()> {
///     let summary = run_with_shutdown(manager).await?;
///     println!("cancelled: {}", summary.cancelled);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: Manager) -> Result<RunSummary> {
    let shutdown = manager.shutdown_handle();
    let run = manager.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => {
            tracing::info!("Stopping run, waiting for held tasks");
            shutdown.cancel();
        }
    }

    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
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
