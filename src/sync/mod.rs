//! Sync orchestration
//!
//! A pass over one subject walks the listing for posts newer than the
//! watermark, fetches each post's detail, filters it, downloads its media into
//! `download_dir/<subject folder>/<post folder>/` and finally reports the new
//! watermark. [`SyncEngine::sync_subject`] wraps a pass with the per-subject
//! lock and persists the watermark through the [`SubjectStore`].

use crate::api::{ApiClient, parse_subject_url};
use crate::config::{Config, DownloadConfig};
use crate::downloader::{DownloadStatus, Downloader};
use crate::error::{Error, Result};
use crate::fetcher::fetch_new_posts;
use crate::filter::PostFilter;
use crate::http::HttpSession;
use crate::naming;
use crate::store::SubjectStore;
use crate::types::{
    DownloadOutcome, Event, FailedFile, PostDetail, Subject, SubjectKey, SubjectReport,
    SyncSummary,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;


/// Name of the sidecar file holding a post's text body
pub const CONTENT_FILE: &str = "content.txt";

/// Runs sync passes and owns the collaborators they need
pub struct SyncEngine {
    config: Config,
    api: ApiClient,
    store: Arc<dyn SubjectStore>,
    filter: PostFilter,
    event_tx: broadcast::Sender<Event>,
    locks: std::sync::Mutex<HashMap<SubjectKey, Arc<Mutex<()>>>>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create an engine over a session and a subject store
    pub fn new(config: Config, session: Arc<dyn HttpSession>, store: Arc<dyn SubjectStore>) -> Self {
        let (event_tx, _rx) = broadcast::channel(1000);
        let api = ApiClient::new(session, config.api.clone());
        let filter = PostFilter::new(config.filter.clone());

        Self {
            config,
            api,
            store,
            filter,
            event_tx,
            locks: std::sync::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Share a shutdown token; a cancelled engine stops between posts and
    /// between file chunks
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Subscribe to progress and outcome events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subject store
    pub fn store(&self) -> &Arc<dyn SubjectStore> {
        &self.store
    }

    /// API client
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Shutdown token observed by passes
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn downloader(&self, download: &DownloadConfig) -> Downloader {
        Downloader::new(self.api.session().clone(), &self.config.api, download)
            .with_events(self.event_tx.clone())
            .with_cancellation(self.cancel.clone())
    }

    fn subject_lock(&self, key: &SubjectKey) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(key.clone()).or_default().clone()
    }

    /// Run one pass over `subject` without locking or persisting
    ///
    /// Callers that share the store with other tasks should use
    /// [`SyncEngine::sync_subject`] instead.
    pub async fn run_pass(&self, subject: &Subject) -> SubjectReport {
        let key = &subject.key;
        let display_name = subject.display_name().to_string();
        let download = self.config.download_for(&subject.overrides);

        tracing::info!(subject = %key, name = %display_name, "Checking subject");
        self.emit_event(Event::SyncStarted {
            subject: key.clone(),
        });

        let mut report = SubjectReport {
            subject: key.clone(),
            display_name,
            posts_checked: 0,
            posts_downloaded: 0,
            posts_filtered: 0,
            outcome: DownloadOutcome::default(),
            previous_watermark: subject.watermark,
            new_watermark: subject.watermark,
            errors: Vec::new(),
        };

        let fetched = fetch_new_posts(&self.api, subject).await;
        if let Some(e) = &fetched.error {
            report.errors.push(format!("listing: {e}"));
        }
        report.posts_checked = fetched.posts.len();

        if fetched.posts.is_empty() {
            tracing::info!(subject = %key, "No new posts");
            return report;
        }

        tracing::info!(subject = %key, count = fetched.posts.len(), "Found new posts");
        self.emit_event(Event::PostsFound {
            subject: key.clone(),
            count: fetched.posts.len(),
        });

        let downloader = self.downloader(&download);
        let subject_rule = (!subject.filter.is_empty()).then_some(&subject.filter);

        for summary in &fetched.posts {
            if self.cancel.is_cancelled() {
                tracing::info!(subject = %key, "Shutdown requested, stopping pass");
                report.errors.push("pass interrupted by shutdown".to_string());
                break;
            }

            let detail = match self.api.fetch_post(key, &summary.id).await {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::error!(subject = %key, post_id = %summary.id, error = %e, "Failed to fetch post");
                    report.errors.push(format!("post {}: {e}", summary.id));
                    continue;
                }
            };

            if !self
                .filter
                .should_download(&detail, subject_rule, subject.use_global_filter)
            {
                tracing::info!(post_id = %summary.id, title = %summary.title, "Skipped (filtered)");
                self.emit_event(Event::PostFiltered {
                    post_id: summary.id.clone(),
                    title: summary.title.clone(),
                });
                report.posts_filtered += 1;
            } else {
                match self.download_post(subject, &detail, &download, &downloader).await {
                    Ok(outcome) => {
                        report.posts_downloaded += 1;
                        report.outcome.merge(outcome);
                    }
                    Err(e) => {
                        tracing::error!(subject = %key, post_id = %summary.id, error = %e, "Failed to prepare post directory");
                        report.errors.push(format!("post {}: {e}", summary.id));
                        continue;
                    }
                }
            }

            // Filtered and downloaded posts both count as seen
            let published = summary.published.or(detail.post.published);
            if let Some(published) = published
                && report.new_watermark.is_none_or(|w| published > w)
            {
                report.new_watermark = Some(published);
            }
        }

        tracing::info!(
            subject = %key,
            checked = report.posts_checked,
            downloaded = report.posts_downloaded,
            filtered = report.posts_filtered,
            files_ok = report.outcome.succeeded,
            files_failed = report.outcome.failed.len(),
            "Subject pass finished"
        );
        report
    }

    async fn download_post(
        &self,
        subject: &Subject,
        detail: &PostDetail,
        download: &DownloadConfig,
        downloader: &Downloader,
    ) -> Result<DownloadOutcome> {
        let dir = post_dir(subject, detail, download);
        tokio::fs::create_dir_all(&dir).await?;

        let media: Vec<_> = detail.media().collect();
        self.emit_event(Event::PostStarted {
            post_id: detail.post.id.clone(),
            title: detail.post.title.clone(),
            files: media.len(),
        });
        tracing::debug!(post_id = %detail.post.id, dir = %dir.display(), files = media.len(), "Downloading post");

        if download.save_content_to_file {
            write_content(&dir, &detail.post.content).await;
        }

        let mut outcome = DownloadOutcome {
            total: media.len(),
            ..DownloadOutcome::default()
        };

        for (idx, item) in media.into_iter().enumerate() {
            let name = naming::file_name(&naming::media_name(item), idx, download);
            let path = dir.join(name);
            let url = item.url();

            let status = downloader
                .download(&url, &path, download.file_max_attempts)
                .await;
            match status {
                DownloadStatus::Skipped | DownloadStatus::Downloaded { .. } => outcome.succeeded += 1,
                DownloadStatus::Failed { .. } => outcome.failed.push(FailedFile { url, path }),
            }
        }

        self.emit_event(Event::PostCompleted {
            post_id: detail.post.id.clone(),
            succeeded: outcome.succeeded,
            failed: outcome.failed.len(),
        });
        Ok(outcome)
    }

    /// Run a locked pass over the stored subject and persist its watermark
    pub async fn sync_subject(&self, key: &SubjectKey) -> Result<SubjectReport> {
        match self.sync_subject_locked(key).await {
            Ok(report) => {
                self.emit_event(Event::SyncCompleted {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                tracing::error!(subject = %key, error = %e, "Sync failed");
                self.emit_event(Event::SyncFailed {
                    subject: key.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn sync_subject_locked(&self, key: &SubjectKey) -> Result<SubjectReport> {
        let lock = self.subject_lock(key);
        let _guard = lock.lock().await;

        // Re-read inside the lock so a pass never starts from a stale watermark
        let subject = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {key}")))?;

        let report = self.run_pass(&subject).await;

        if report.watermark_advanced()
            && let Some(watermark) = report.new_watermark
        {
            self.store.update_watermark(key, watermark).await?;
            tracing::info!(subject = %key, watermark = %watermark, "Watermark advanced");
        }
        Ok(report)
    }

    /// Sync every stored subject, one after another
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        let subjects = self.store.list().await?;
        let mut summary = SyncSummary::default();

        for subject in subjects {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.sync_subject(&subject.key).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => summary.failures.push((subject.key.clone(), e.to_string())),
            }
        }

        let outcome = summary.outcome();
        tracing::info!(
            subjects = summary.reports.len(),
            failed_subjects = summary.failures.len(),
            files_ok = outcome.succeeded,
            files_failed = outcome.failed.len(),
            "Check-all finished"
        );
        Ok(summary)
    }

    /// Download a previously failed set of files again
    pub async fn retry_failed(&self, failed: &[FailedFile]) -> DownloadOutcome {
        let download = &self.config.download;
        let downloader = self.downloader(download);
        let mut outcome = DownloadOutcome {
            total: failed.len(),
            ..DownloadOutcome::default()
        };

        for file in failed {
            if self.cancel.is_cancelled() {
                outcome.failed.push(file.clone());
                continue;
            }
            let status = downloader
                .download(&file.url, &file.path, download.file_max_attempts)
                .await;
            if status.is_success() {
                outcome.succeeded += 1;
            } else {
                outcome.failed.push(file.clone());
            }
        }

        tracing::info!(
            total = outcome.total,
            recovered = outcome.succeeded,
            still_failed = outcome.failed.len(),
            "Retry of failed files finished"
        );
        outcome
    }

    /// Register a subject from its page URL, naming it from the profile
    ///
    /// An already known subject is returned unchanged.
    pub async fn add_subject_from_url(&self, url: &str) -> Result<Subject> {
        let key = parse_subject_url(url)?;
        if let Some(existing) = self.store.get(&key).await? {
            tracing::info!(subject = %key, "Subject already registered");
            return Ok(existing);
        }

        let profile = self.api.fetch_profile(&key).await?;
        let mut subject = Subject::new(key.clone(), profile.name);
        subject
            .extra
            .insert("url".to_string(), serde_json::Value::String(url.trim().to_string()));

        self.store.upsert(subject.clone()).await?;
        tracing::info!(subject = %key, name = %subject.name, "Subject added");
        Ok(subject)
    }
}

/// `download_dir/<subject folder>/<post folder>`
pub fn post_dir(subject: &Subject, detail: &PostDetail, download: &DownloadConfig) -> PathBuf {
    download
        .download_dir
        .join(naming::subject_folder(subject, download))
        .join(naming::post_folder(&detail.post, download))
}

async fn write_content(dir: &Path, content: &str) {
    let content = content.trim();
    if content.is_empty() {
        return;
    }
    let path = dir.join(CONTENT_FILE);
    if let Err(e) = tokio::fs::write(&path, content).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to save post content");
    }
}
