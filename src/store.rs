//! Subject persistence
//!
//! The sync engine only needs [`SubjectStore`]. [`JsonSubjectStore`] keeps the
//! list in a single JSON file shaped as `{"artists": [...]}` and rewrites it
//! atomically (temp file + rename) on every change. The file is re-read on each
//! call so hand edits made while the process runs are picked up.

use crate::error::{Error, Result};
use crate::types::{Subject, SubjectKey};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persistence collaborator for subjects and their watermarks
#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// All subjects, in stored order
    async fn list(&self) -> Result<Vec<Subject>>;

    /// One subject by key
    async fn get(&self, key: &SubjectKey) -> Result<Option<Subject>>;

    /// Set the watermark of an existing subject
    async fn update_watermark(&self, key: &SubjectKey, watermark: NaiveDateTime) -> Result<()>;

    /// Insert a subject, or replace the one with the same key
    async fn upsert(&self, subject: Subject) -> Result<()>;

    /// Remove a subject; returns whether it existed
    async fn remove(&self, key: &SubjectKey) -> Result<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubjectList {
    #[serde(default)]
    artists: Vec<Subject>,
}

/// Subject store backed by a JSON file
#[derive(Debug)]
pub struct JsonSubjectStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonSubjectStore {
    /// Store at `path`; the file is created on the first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_error(&self, reason: impl ToString) -> Error {
        Error::Store {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    async fn load(&self) -> Result<SubjectList> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(SubjectList::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| self.store_error(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubjectList::default()),
            Err(e) => Err(self.store_error(e)),
        }
    }

    async fn save(&self, list: &SubjectList) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.store_error(e))?;
        }

        let json = serde_json::to_vec_pretty(list)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.store_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(())
    }
}

#[async_trait]
impl SubjectStore for JsonSubjectStore {
    async fn list(&self) -> Result<Vec<Subject>> {
        Ok(self.load().await?.artists)
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<Subject>> {
        Ok(self
            .load()
            .await?
            .artists
            .into_iter()
            .find(|s| &s.key == key))
    }

    async fn update_watermark(&self, key: &SubjectKey, watermark: NaiveDateTime) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;
        let subject = list
            .artists
            .iter_mut()
            .find(|s| &s.key == key)
            .ok_or_else(|| Error::NotFound(format!("subject {key}")))?;
        subject.watermark = Some(watermark);
        self.save(&list).await?;
        tracing::debug!(subject = %key, watermark = %watermark, "Watermark saved");
        Ok(())
    }

    async fn upsert(&self, subject: Subject) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;
        match list.artists.iter_mut().find(|s| s.key == subject.key) {
            Some(existing) => *existing = subject,
            None => list.artists.push(subject),
        }
        self.save(&list).await
    }

    async fn remove(&self, key: &SubjectKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;
        let before = list.artists.len();
        list.artists.retain(|s| &s.key != key);
        let removed = list.artists.len() != before;
        if removed {
            self.save(&list).await?;
        }
        Ok(removed)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::RecurrenceRule;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() {
        let dir = tempdir().unwrap();
        let store = JsonSubjectStore::new(dir.path().join("artists.json"));

        assert!(store.list().await.unwrap().is_empty());
        assert!(
            store
                .get(&SubjectKey::new("fanbox", "1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn upsert_then_update_watermark_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artists.json");
        let store = JsonSubjectStore::new(&path);
        let key = SubjectKey::new("fanbox", "1");

        store.upsert(Subject::new(key.clone(), "Artist")).await.unwrap();
        store.update_watermark(&key, ts(3)).await.unwrap();

        let reopened = JsonSubjectStore::new(&path);
        let subject = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(subject.watermark, Some(ts(3)));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["artists"][0]["last_post_date"], "2024-01-03T00:00:00");
        assert!(!dir.path().join("artists.json.tmp").exists());
    }

    #[tokio::test]
    async fn watermark_keeps_fractional_seconds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artists.json");
        let store = JsonSubjectStore::new(&path);
        let key = SubjectKey::new("fanbox", "1");
        let precise = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_milli_opt(10, 20, 30, 500)
            .unwrap();

        store.upsert(Subject::new(key.clone(), "Artist")).await.unwrap();
        store.update_watermark(&key, precise).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["artists"][0]["last_post_date"], "2024-01-03T10:20:30.500");

        let reloaded = JsonSubjectStore::new(&path)
            .get(&key)
            .await
            .unwrap()
            .unwrap()
            .watermark
            .unwrap();
        assert_eq!(reloaded, precise);
        // The post that set the watermark must not look new on the next pass
        assert!(precise <= reloaded);
    }

    #[tokio::test]
    async fn upsert_replaces_same_key() {
        let dir = tempdir().unwrap();
        let store = JsonSubjectStore::new(dir.path().join("artists.json"));
        let key = SubjectKey::new("patreon", "9");

        store.upsert(Subject::new(key.clone(), "Old")).await.unwrap();
        store.upsert(Subject::new(key.clone(), "New")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "New");
    }

    #[tokio::test]
    async fn update_watermark_of_unknown_subject_fails() {
        let dir = tempdir().unwrap();
        let store = JsonSubjectStore::new(dir.path().join("artists.json"));

        let err = store
            .update_watermark(&SubjectKey::new("fanbox", "404"), ts(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_reports_whether_present() {
        let dir = tempdir().unwrap();
        let store = JsonSubjectStore::new(dir.path().join("artists.json"));
        let key = SubjectKey::new("fanbox", "1");
        store.upsert(Subject::new(key.clone(), "A")).await.unwrap();

        assert!(store.remove(&key).await.unwrap());
        assert!(!store.remove(&key).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artists.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonSubjectStore::new(&path);

        assert!(matches!(store.list().await, Err(Error::Store { .. })));
    }

    #[tokio::test]
    async fn unknown_fields_survive_a_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artists.json");
        std::fs::write(
            &path,
            r#"{"artists": [{
                "id": "b0c4e7d2-1111-2222-3333-444455556666",
                "name": "A",
                "service": "fanbox",
                "user_id": "1",
                "url": "https://kemono.cr/fanbox/user/1",
                "last_post_date": null
            }]}"#,
        )
        .unwrap();
        let store = JsonSubjectStore::new(&path);

        store
            .update_watermark(&SubjectKey::new("fanbox", "1"), ts(2))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let entry = &raw["artists"][0];
        assert_eq!(entry["id"], "b0c4e7d2-1111-2222-3333-444455556666");
        assert_eq!(entry["url"], "https://kemono.cr/fanbox/user/1");
        assert_eq!(entry["last_post_date"], "2024-01-02T00:00:00");
    }

    #[tokio::test]
    async fn malformed_timer_does_not_hide_other_subjects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artists.json");
        std::fs::write(
            &path,
            r#"{"artists": [
                {"service": "fanbox", "user_id": "1", "name": "Good",
                 "timer": {"type": "daily", "time": "04:00"}},
                {"service": "fanbox", "user_id": "2", "name": "Bad",
                 "timer": {"type": "hourly", "time": "25:00"}}
            ]}"#,
        )
        .unwrap();
        let store = JsonSubjectStore::new(&path);

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[1].recurrence,
            Some(RecurrenceRule::Daily {
                time: chrono::NaiveTime::from_hms_opt(2, 0, 0).unwrap()
            })
        );

        let good = store
            .get(&SubjectKey::new("fanbox", "1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(good.name, "Good");
        assert_eq!(
            good.recurrence,
            Some(RecurrenceRule::Daily {
                time: chrono::NaiveTime::from_hms_opt(4, 0, 0).unwrap()
            })
        );
    }
}
