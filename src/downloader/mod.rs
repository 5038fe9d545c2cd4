//! Resumable single-file downloader
//!
//! One remote resource to one local path:
//!
//! 1. If the destination exists, a HEAD probe compares `Content-Length` with
//!    the local size; a match skips the transfer.
//! 2. Otherwise the local length becomes the resume offset and a ranged GET is
//!    issued. A server that answers 200 to a ranged request gets the partial
//!    file discarded and the transfer restarts from zero.
//! 3. The body is streamed to disk chunk by chunk. Failed attempts back off
//!    for `unit * 2^(attempt+1)` and resume from whatever reached the disk.
//!
//! Partial files are never deleted on failure, so the next pass can resume.

use crate::config::{ApiConfig, DownloadConfig};
use crate::error::{Error, Result};
use crate::http::{ByteStream, HttpSession, RequestOptions};
use crate::types::Event;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;


/// Minimum number of bytes between two progress events
const PROGRESS_STEP: u64 = 256 * 1024;

/// Outcome of one [`Downloader::download`] call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadStatus {
    /// The file already existed with the size the server reports
    Skipped,
    /// The transfer finished
    Downloaded {
        /// Final size on disk
        bytes: u64,
        /// Offset the last, successful attempt resumed from (0 = fresh)
        resumed_from: u64,
    },
    /// Every attempt failed
    Failed {
        /// Last error
        error: String,
        /// Partial file left on disk, if any
        partial: Option<PathBuf>,
    },
}

impl DownloadStatus {
    /// True for `Skipped` and `Downloaded`
    pub fn is_success(&self) -> bool {
        !matches!(self, DownloadStatus::Failed { .. })
    }
}

/// Bytes on disk after a successful attempt
#[derive(Debug)]
struct Transfer {
    bytes: u64,
    resumed_from: u64,
}

/// Streams media files to disk with probe, resume and retry
#[derive(Clone)]
pub struct Downloader {
    session: Arc<dyn HttpSession>,
    probe_timeout: Duration,
    file_timeout: Duration,
    retry_unit: Duration,
    event_tx: Option<broadcast::Sender<Event>>,
    cancel: Option<CancellationToken>,
}

impl Downloader {
    /// Create a downloader using the transport timeouts of `api` and the retry
    /// unit of `download`
    pub fn new(session: Arc<dyn HttpSession>, api: &ApiConfig, download: &DownloadConfig) -> Self {
        Self {
            session,
            probe_timeout: api.probe_timeout,
            file_timeout: api.file_timeout,
            retry_unit: download.file_retry_unit,
            event_tx: None,
            cancel: None,
        }
    }

    /// Publish progress and outcome events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Stop transfers between chunks once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Override the backoff unit
    pub fn with_retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    fn emit_event(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            tx.send(event).ok();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Download `url` to `dest`, making at most `max_attempts` attempts
    pub async fn download(&self, url: &str, dest: &Path, max_attempts: u32) -> DownloadStatus {
        if self.already_complete(url, dest).await {
            tracing::debug!(path = %dest.display(), "File exists with expected size, skipping");
            self.emit_event(Event::FileSkipped {
                path: dest.to_path_buf(),
            });
            return DownloadStatus::Skipped;
        }

        let max_attempts = max_attempts.max(1);
        let mut last_error = Error::Other("download not attempted".to_string());

        for attempt in 0..max_attempts {
            if self.is_cancelled() {
                last_error = Error::Cancelled;
                break;
            }

            match self.attempt(url, dest).await {
                Ok(transfer) => {
                    tracing::info!(
                        path = %dest.display(),
                        bytes = transfer.bytes,
                        resumed_from = transfer.resumed_from,
                        "Download complete"
                    );
                    self.emit_event(Event::FileCompleted {
                        path: dest.to_path_buf(),
                        bytes: transfer.bytes,
                    });
                    return DownloadStatus::Downloaded {
                        bytes: transfer.bytes,
                        resumed_from: transfer.resumed_from,
                    };
                }
                Err(Error::Cancelled) => {
                    last_error = Error::Cancelled;
                    break;
                }
                Err(e) => {
                    let remaining = attempt + 1 < max_attempts;
                    tracing::warn!(
                        url,
                        path = %dest.display(),
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts,
                        "Download interrupted"
                    );
                    last_error = e;

                    if remaining && !self.backoff(attempt).await {
                        last_error = Error::Cancelled;
                        break;
                    }
                }
            }
        }

        let partial = match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.is_file() => Some(dest.to_path_buf()),
            _ => None,
        };
        let error = last_error.to_string();
        tracing::error!(
            url,
            path = %dest.display(),
            error = %error,
            partial = partial.is_some(),
            "Download failed, partial file kept"
        );
        self.emit_event(Event::FileFailed {
            url: url.to_string(),
            path: dest.to_path_buf(),
            error: error.clone(),
        });

        DownloadStatus::Failed { error, partial }
    }

    /// Sleep before the retry that follows `attempt` (0-based); false if
    /// cancelled while waiting
    async fn backoff(&self, attempt: u32) -> bool {
        let wait = 2u32
            .checked_pow(attempt.saturating_add(1))
            .and_then(|factor| self.retry_unit.checked_mul(factor))
            .unwrap_or(Duration::from_secs(u32::MAX as u64));
        tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting before download retry");

        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(wait) => true,
            },
            None => {
                tokio::time::sleep(wait).await;
                true
            }
        }
    }

    /// HEAD probe: true when the local file already has the advertised size
    async fn already_complete(&self, url: &str, dest: &Path) -> bool {
        let local = match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return false,
        };

        match self
            .session
            .head(url, RequestOptions::with_timeout(self.probe_timeout))
            .await
        {
            Ok(response) if response.is_success() => {
                matches!(response.content_length(), Some(expected) if expected > 0 && expected == local)
            }
            Ok(response) => {
                tracing::debug!(url, status = response.status, "Size probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "Size probe failed");
                false
            }
        }
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Result<Transfer> {
        let mut offset = match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };

        let mut options = RequestOptions::with_timeout(self.file_timeout);
        if offset > 0 {
            tracing::debug!(path = %dest.display(), offset, "Found partial file, resuming");
            options = options.range_from(offset);
        }

        let response = self.session.get(url, options).await?;
        if response.status != 200 && response.status != 206 {
            return Err(Error::Http {
                status: response.status,
                url: url.to_string(),
            });
        }

        if offset > 0 && response.status == 200 {
            tracing::warn!(url, offset, "Server ignored range request, restarting from zero");
            match tokio::fs::remove_file(dest).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            offset = 0;
        }

        let total = response.content_length().map(|len| len + offset);

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(dest).await?
        } else {
            tokio::fs::File::create(dest).await?
        };

        let streamed = self
            .stream_body(response.into_body(), &mut file, dest, offset, total)
            .await;
        // Flush even on failure so the partial length is accurate for the next attempt
        let flushed = file.flush().await;
        let written = streamed?;
        flushed?;

        if let Some(total) = total
            && written < total
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("body ended at {written} of {total} bytes"),
            )));
        }

        Ok(Transfer {
            bytes: written,
            resumed_from: offset,
        })
    }

    async fn stream_body(
        &self,
        mut body: ByteStream,
        file: &mut tokio::fs::File,
        dest: &Path,
        offset: u64,
        total: Option<u64>,
    ) -> Result<u64> {
        let mut written = offset;
        let mut reported = offset;

        loop {
            let next = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    next = body.next() => next,
                },
                None => body.next().await,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if written - reported >= PROGRESS_STEP {
                reported = written;
                self.emit_event(Event::FileProgress {
                    path: dest.to_path_buf(),
                    written,
                    total,
                });
            }
        }

        if written != reported {
            self.emit_event(Event::FileProgress {
                path: dest.to_path_buf(),
                written,
                total,
            });
        }
        Ok(written)
    }
}
