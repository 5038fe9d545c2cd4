//! # kemono-sync
//!
//! Incremental post synchronization and resumable media downloads for
//! kemono-style content APIs (`/{service}/user/{id}/...`).
//!
//! ## Design Philosophy
//!
//! kemono-sync is designed to be:
//! - **Incremental** - each subject keeps a watermark; only newer posts are fetched
//! - **Resumable** - partial files are kept and continued with range requests
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use kemono_sync::{Config, JsonSubjectStore, ReqwestSession, SyncEngine};
//! use std::sync::Arc;
//! use tokio::sync::broadcast::error::RecvError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let session = Arc::new(ReqwestSession::new(&config.api)?);
//!     session.bootstrap().await?;
//!     let store = Arc::new(JsonSubjectStore::new(&config.persistence.subjects_file));
//!     let engine = SyncEngine::new(config, session, store);
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         loop {
//!             match events.recv().await {
//!                 Ok(event) => println!("Event: {:?}", event),
//!                 // A slow subscriber skips missed events and keeps going
//!                 Err(RecvError::Lagged(_)) => continue,
//!                 Err(RecvError::Closed) => break,
//!             }
//!         }
//!     });
//!
//!     let subject = engine
//!         .add_subject_from_url("https://kemono.cr/fanbox/user/12345")
//!         .await?;
//!     let report = engine.sync_subject(&subject.key).await?;
//!     println!("{} new posts", report.posts_downloaded);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Endpoint client for profile, post and listing requests
pub mod api;
/// Configuration types
pub mod config;
/// Resumable single-file downloader
pub mod downloader;
/// Error types
pub mod error;
/// Paginated walk for posts newer than a watermark
pub mod fetcher;
/// Post filtering rules
pub mod filter;
/// HTTP session abstraction and reqwest implementation
pub mod http;
/// Folder and file naming
pub mod naming;
/// Recurrence rules for scheduled checks
pub mod recurrence;
/// Retry logic with linear or exponential backoff
pub mod retry;
/// Time-based scheduling of subject checks
pub mod scheduler;
/// Subject persistence
pub mod store;
/// Sync orchestration
pub mod sync;
/// Core types and events
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use api::{ApiClient, parse_subject_url};
pub use config::{ApiConfig, Config, DownloadConfig, DownloadOverrides, RetryConfig};
pub use downloader::{DownloadStatus, Downloader};
pub use error::{Error, Result};
pub use filter::{FilterRule, PostFilter};
pub use http::{HttpResponse, HttpSession, ReqwestSession, RequestOptions};
pub use recurrence::{RecurrenceRule, Weekday};
pub use scheduler::Scheduler;
pub use store::{JsonSubjectStore, SubjectStore};
pub use sync::SyncEngine;
pub use types::{
    DownloadOutcome, Event, FailedFile, PostDetail, Subject, SubjectKey, SubjectReport,
    SyncSummary,
};

/// Helper function to run the scheduler with graceful signal handling.
///
/// Starts `scheduler` in the background, waits for a termination signal, then
/// cancels `shutdown` and waits for the scheduler to stop. Share the same
/// token with [`SyncEngine::with_cancellation`] so a running pass also stops
/// between files.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use kemono_sync::{Config, JsonSubjectStore, ReqwestSession, Scheduler, SyncEngine, run_with_shutdown};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let session = Arc::new(ReqwestSession::new(&config.api)?);
///     let store = Arc::new(JsonSubjectStore::new(&config.persistence.subjects_file));
///     let shutdown = CancellationToken::new();
///     let engine = SyncEngine::new(config, session, store).with_cancellation(shutdown.clone());
///
///     // Run with automatic signal handling
///     run_with_shutdown(Scheduler::new(Arc::new(engine)), shutdown).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    scheduler: Scheduler,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    wait_for_signal().await;
    shutdown.cancel();

    task.await
        .map_err(|e| Error::Other(format!("scheduler task failed: {e}")))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
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
