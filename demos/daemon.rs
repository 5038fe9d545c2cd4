//! Background sync daemon
//!
//! Loads `config.json` (written with defaults on first run), registers any
//! subject URLs given on the command line, then runs the scheduler until
//! SIGINT/SIGTERM.
//!
//! Usage: cargo run --example daemon -- [CONFIG] [SUBJECT_URL...]
//!
//! Log level is taken from `RUST_LOG` (default: `info`).

use std::path::PathBuf;
use std::sync::Arc;
use kemono_sync::{
    Config, Event, JsonSubjectStore, ReqwestSession, Scheduler, SyncEngine, run_with_shutdown,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).unwrap_or_else(|| "config.json".into());
    let subject_urls: Vec<String> = args.collect();

    let config = Config::load(&config_path).await?;

    let session = Arc::new(ReqwestSession::new(&config.api)?);
    if let Err(e) = session.bootstrap().await {
        tracing::warn!(error = %e, "Session bootstrap failed, continuing without cookies");
    }
    let store = Arc::new(JsonSubjectStore::new(&config.persistence.subjects_file));

    let shutdown = CancellationToken::new();
    let engine = Arc::new(SyncEngine::new(config, session, store).with_cancellation(shutdown.clone()));

    for url in &subject_urls {
        match engine.add_subject_from_url(url).await {
            Ok(subject) => println!("Watching {} ({})", subject.display_name(), subject.key),
            Err(e) => eprintln!("Could not add {url}: {e}"),
        }
    }

    // Print a line per finished pass
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event printer fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                Event::SyncCompleted { report } => {
                    println!(
                        "{}: {} new posts, {} files ok, {} failed",
                        report.display_name,
                        report.posts_downloaded,
                        report.outcome.succeeded,
                        report.outcome.failed.len()
                    );
                }
                Event::SyncFailed { subject, error } => {
                    println!("{subject}: check failed: {error}");
                }
                _ => {}
            }
        }
    });

    run_with_shutdown(Scheduler::new(engine), shutdown).await?;
    println!("Stopped");
    Ok(())
}
