use super::*;
use crate::config::Config;
use crate::error::Error;
use crate::store::SubjectStore;
use crate::test_helpers::{FakeSession, MemorySubjectStore, Reply};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const API: &str = "https://api.test/v1";

struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    fn at(now: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn daily(h: u32) -> RecurrenceRule {
    RecurrenceRule::Daily {
        time: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
    }
}

fn listing(user: &str) -> String {
    format!("{API}/fanbox/user/{user}/posts")
}

fn subject(user: &str, rule: Option<RecurrenceRule>) -> Subject {
    let mut subject = Subject::new(SubjectKey::new("fanbox", user), format!("Artist {user}"));
    subject.recurrence = rule;
    subject
}

struct Harness {
    scheduler: Scheduler,
    session: Arc<FakeSession>,
    store: Arc<MemorySubjectStore>,
    clock: Arc<FixedClock>,
    _dir: TempDir,
}

fn harness(subjects: Vec<Subject>, global: Option<RecurrenceRule>, use_global: bool) -> Harness {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.api.base_url = API.to_string();
    config.download.download_dir = dir.path().to_path_buf();
    config.schedule.global_timer = global;
    config.schedule.schedule_global_timer = use_global;

    let session = Arc::new(FakeSession::new());
    for s in &subjects {
        session.push_get(listing(&s.key.user_id), Reply::json(json!([])));
    }
    let store = Arc::new(MemorySubjectStore::with(subjects));
    let engine = Arc::new(SyncEngine::new(config, session.clone(), store.clone()));
    let clock = FixedClock::at(at(1, 0, 0));
    let scheduler = Scheduler::new(engine).with_clock(clock.clone());

    Harness {
        scheduler,
        session,
        store,
        clock,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_first_tick_only_computes_due_time() {
    let mut h = harness(vec![subject("1", Some(daily(2)))], None, false);

    let triggered = h.scheduler.tick(at(1, 1, 0)).await.unwrap();

    assert!(triggered.is_empty());
    assert_eq!(h.scheduler.due(&SubjectKey::new("fanbox", "1")), Some(at(1, 2, 0)));
    assert_eq!(h.session.requests_to(&listing("1")), 0);
}

#[tokio::test]
async fn test_due_subject_is_synced_and_rescheduled_from_clock() {
    let mut h = harness(vec![subject("1", Some(daily(2)))], None, false);
    let key = SubjectKey::new("fanbox", "1");
    h.scheduler.tick(at(1, 1, 0)).await.unwrap();

    // The pass finishes a few minutes after it was due
    h.clock.set(at(1, 2, 5));
    let triggered = h.scheduler.tick(at(1, 2, 0)).await.unwrap();

    assert_eq!(triggered, vec![key.clone()]);
    assert_eq!(h.session.requests_to(&listing("1")), 1);
    assert_eq!(h.scheduler.due(&key), Some(at(2, 2, 0)));

    let again = h.scheduler.tick(at(1, 2, 1)).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_global_rule_applies_only_when_enabled() {
    let s = subject("1", None);

    let mut enabled = harness(vec![s.clone()], Some(daily(3)), true);
    enabled.scheduler.tick(at(1, 1, 0)).await.unwrap();
    assert_eq!(enabled.scheduler.due(&s.key), Some(at(1, 3, 0)));
    assert_eq!(enabled.scheduler.effective_rule(&s), Some(daily(3)));

    let mut disabled = harness(vec![s.clone()], Some(daily(3)), false);
    disabled.scheduler.tick(at(1, 1, 0)).await.unwrap();
    assert_eq!(disabled.scheduler.due(&s.key), None);
    assert_eq!(disabled.scheduler.effective_rule(&s), None);
}

#[tokio::test]
async fn test_own_rule_wins_over_global_rule() {
    let s = subject("1", Some(daily(5)));
    let h = harness(vec![s.clone()], Some(daily(3)), true);

    assert_eq!(h.scheduler.effective_rule(&s), Some(daily(5)));
}

#[tokio::test]
async fn test_rule_change_recomputes_due_time() {
    let mut h = harness(vec![subject("1", Some(daily(2)))], None, false);
    let key = SubjectKey::new("fanbox", "1");
    h.scheduler.tick(at(1, 1, 0)).await.unwrap();
    assert_eq!(h.scheduler.due(&key), Some(at(1, 2, 0)));

    h.store
        .upsert(subject("1", Some(daily(6))))
        .await
        .unwrap();
    h.scheduler.tick(at(1, 1, 30)).await.unwrap();

    assert_eq!(h.scheduler.due(&key), Some(at(1, 6, 0)));
}

#[tokio::test]
async fn test_removed_subject_is_evicted() {
    let mut h = harness(
        vec![subject("1", Some(daily(2))), subject("2", Some(daily(2)))],
        None,
        false,
    );
    h.scheduler.tick(at(1, 1, 0)).await.unwrap();

    h.store.remove(&SubjectKey::new("fanbox", "2")).await.unwrap();
    h.scheduler.tick(at(1, 1, 1)).await.unwrap();

    assert!(h.scheduler.due(&SubjectKey::new("fanbox", "1")).is_some());
    assert_eq!(h.scheduler.due(&SubjectKey::new("fanbox", "2")), None);
}

/// Lists subjects but cannot load one of them
struct FlakyStore {
    inner: MemorySubjectStore,
    broken: SubjectKey,
}

#[async_trait]
impl SubjectStore for FlakyStore {
    async fn list(&self) -> crate::error::Result<Vec<Subject>> {
        self.inner.list().await
    }

    async fn get(&self, key: &SubjectKey) -> crate::error::Result<Option<Subject>> {
        if key == &self.broken {
            return Err(Error::Other("disk on fire".to_string()));
        }
        self.inner.get(key).await
    }

    async fn update_watermark(
        &self,
        key: &SubjectKey,
        watermark: NaiveDateTime,
    ) -> crate::error::Result<()> {
        self.inner.update_watermark(key, watermark).await
    }

    async fn upsert(&self, subject: Subject) -> crate::error::Result<()> {
        self.inner.upsert(subject).await
    }

    async fn remove(&self, key: &SubjectKey) -> crate::error::Result<bool> {
        self.inner.remove(key).await
    }
}

#[tokio::test]
async fn test_failing_subject_does_not_stop_the_tick() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.api.base_url = API.to_string();
    config.download.download_dir = dir.path().to_path_buf();

    let session = Arc::new(FakeSession::new());
    session.push_get(listing("2"), Reply::json(json!([])));
    let store = Arc::new(FlakyStore {
        inner: MemorySubjectStore::with(vec![
            subject("1", Some(daily(2))),
            subject("2", Some(daily(2))),
        ]),
        broken: SubjectKey::new("fanbox", "1"),
    });
    let engine = Arc::new(SyncEngine::new(config, session.clone(), store));
    let clock = FixedClock::at(at(1, 2, 0));
    let mut scheduler = Scheduler::new(engine).with_clock(clock);

    scheduler.tick(at(1, 1, 0)).await.unwrap();
    let triggered = scheduler.tick(at(1, 2, 0)).await.unwrap();

    assert_eq!(triggered.len(), 2);
    assert_eq!(session.requests_to(&listing("2")), 1);
    // The failed subject still moves on to its next slot
    assert_eq!(
        scheduler.due(&SubjectKey::new("fanbox", "1")),
        Some(at(2, 2, 0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let h = harness(vec![subject("1", Some(daily(2)))], None, false);
    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(150)).await;
        stopper.cancel();
    });

    tokio::time::timeout(Duration::from_secs(600), h.scheduler.run(shutdown))
        .await
        .expect("scheduler should stop after shutdown");
}

#[test]
fn test_system_clock_is_close_to_now() {
    let now = SystemClock.now();
    let local = Local::now().naive_local();

    assert!((local - now).num_seconds().abs() < 5);
}
