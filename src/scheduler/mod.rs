//! Time-driven background checks
//!
//! The scheduler keeps, for every subject with an effective recurrence rule,
//! the next instant it is due. Each tick syncs the subjects whose due instant
//! has passed and then recomputes their next due instant from the clock.
//!
//! A subject's effective rule is its own `timer`, or the configured
//! `global_timer` when `schedule_global_timer` is enabled.
//!
//! # Example
//!
//! ```no_run
//! use kemono_sync::{Config, JsonSubjectStore, ReqwestSession, SyncEngine};
//! use kemono_sync::scheduler::Scheduler;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let session = Arc::new(ReqwestSession::new(&config.api)?);
//! let store = Arc::new(JsonSubjectStore::new(&config.persistence.subjects_file));
//! let engine = Arc::new(SyncEngine::new(config, session, store));
//!
//! let shutdown = CancellationToken::new();
//! let scheduler = Scheduler::new(engine);
//! tokio::spawn(scheduler.run(shutdown.clone()));
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::recurrence::RecurrenceRule;
use crate::sync::SyncEngine;
use crate::types::{Subject, SubjectKey};
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Source of the current local time
pub trait Clock: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in the local timezone
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Cached due instant of one subject
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DueEntry {
    /// Rule the instant was computed from
    pub rule: RecurrenceRule,
    /// Next instant the subject should be synced
    pub due: NaiveDateTime,
}

/// Background scheduler driving [`SyncEngine::sync_subject`]
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    clock: Arc<dyn Clock>,
    entries: HashMap<SubjectKey, DueEntry>,
}

impl Scheduler {
    /// Create a scheduler on the system clock
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            entries: HashMap::new(),
        }
    }

    /// Use a different clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cached due instant of a subject, if it has been scheduled
    pub fn due(&self, key: &SubjectKey) -> Option<NaiveDateTime> {
        self.entries.get(key).map(|entry| entry.due)
    }

    /// Rule that triggers `subject`, if any
    pub fn effective_rule(&self, subject: &Subject) -> Option<RecurrenceRule> {
        let schedule = &self.engine.config().schedule;
        match subject.recurrence {
            Some(rule) => Some(rule),
            None if schedule.schedule_global_timer => schedule.global_timer,
            None => None,
        }
    }

    /// Sync every subject due at `now`
    ///
    /// Returns the keys of the subjects that were triggered. Failures of
    /// individual subjects are logged and do not stop the tick; only a
    /// failure to list the subjects is returned.
    pub async fn tick(&mut self, now: NaiveDateTime) -> Result<Vec<SubjectKey>> {
        let subjects = self.engine.store().list().await?;

        let mut scheduled: HashMap<SubjectKey, DueEntry> = HashMap::with_capacity(subjects.len());
        for subject in &subjects {
            let Some(rule) = self.effective_rule(subject) else {
                continue;
            };
            let entry = match self.entries.get(&subject.key) {
                Some(entry) if entry.rule == rule => *entry,
                _ => {
                    let due = rule.next_after(now);
                    debug!(subject = %subject.key, due = %due, "Scheduled subject");
                    DueEntry { rule, due }
                }
            };
            scheduled.insert(subject.key.clone(), entry);
        }

        let evicted = self
            .entries
            .keys()
            .filter(|key| !scheduled.contains_key(*key))
            .count();
        if evicted > 0 {
            debug!(evicted, "Dropped subjects no longer scheduled");
        }
        self.entries = scheduled;

        let mut due: Vec<SubjectKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.due)
            .map(|(key, _)| key.clone())
            .collect();
        due.sort();

        for key in &due {
            if self.engine.cancellation().is_cancelled() {
                break;
            }
            info!(subject = %key, "Scheduled check due");
            if let Err(e) = self.engine.sync_subject(key).await {
                error!(subject = %key, error = %e, "Scheduled check failed");
            }

            let after = self.clock.now();
            if let Some(entry) = self.entries.get_mut(key) {
                entry.due = entry.rule.next_after(after);
                debug!(subject = %key, due = %entry.due, "Next check");
            }
        }

        Ok(due)
    }

    /// Tick every `tick_interval` until `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) {
        let interval = self.engine.config().schedule.tick_interval;
        info!(interval_secs = interval.as_secs(), "Scheduler started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let now = self.clock.now();
            if let Err(e) = self.tick(now).await {
                error!(error = %e, "Scheduler tick failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Scheduler stopped");
    }
}
