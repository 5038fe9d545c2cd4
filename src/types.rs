//! Core types and events

use crate::config::DownloadOverrides;
use crate::filter::FilterRule;
use crate::recurrence::RecurrenceRule;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of a monitored subject (an artist or channel on one service)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Service name as used in API paths (e.g., "fanbox", "patreon")
    pub service: String,
    /// Service-specific user id
    pub user_id: String,
}

impl SubjectKey {
    /// Create a new key
    pub fn new(service: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.user_id)
    }
}

/// A monitored creator and its sync state
///
/// Field names on disk follow the artist list format (`last_post_date`, `timer`,
/// `config_override`, `filter`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Immutable identity
    #[serde(flatten)]
    pub key: SubjectKey,

    /// Name reported by the service profile
    pub name: String,

    /// User-chosen display alias (empty string on disk means none)
    #[serde(default, deserialize_with = "empty_as_none")]
    pub alias: Option<String>,

    /// Publish timestamp of the newest post already handled
    #[serde(
        rename = "last_post_date",
        default,
        with = "timestamp::option"
    )]
    pub watermark: Option<NaiveDateTime>,

    /// Per-subject recurrence rule (None = global rule, if scheduling it is enabled)
    #[serde(
        rename = "timer",
        default,
        deserialize_with = "crate::recurrence::lenient_option"
    )]
    pub recurrence: Option<RecurrenceRule>,

    /// Whether the global filter applies to this subject
    #[serde(default = "default_true")]
    pub use_global_filter: bool,

    /// Download setting overrides merged over the global config
    #[serde(rename = "config_override", default)]
    pub overrides: DownloadOverrides,

    /// Subject-specific filter rule
    #[serde(default)]
    pub filter: FilterRule,

    /// Fields this crate does not interpret (`id`, `url`, ...), written back unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Subject {
    /// Create a subject with no watermark, rule, overrides or filter
    pub fn new(key: SubjectKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            alias: None,
            watermark: None,
            recurrence: None,
            use_global_filter: true,
            overrides: DownloadOverrides::default(),
            filter: FilterRule::default(),
            extra: serde_json::Map::new(),
        }
    }

    /// Alias when set, otherwise the profile name
    pub fn display_name(&self) -> &str {
        match self.alias.as_deref() {
            Some(alias) if !alias.is_empty() => alias,
            _ => &self.name,
        }
    }
}

fn default_true() -> bool {
    true
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Lightweight listing entry, used only to decide fetch order and stop point
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PostSummary {
    /// Post id
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    /// Post title
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,

    /// Publish timestamp (None when missing or unparseable)
    #[serde(default, with = "timestamp::option")]
    pub published: Option<NaiveDateTime>,
}

/// Body of a post detail response
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PostBody {
    /// Post id
    #[serde(deserialize_with = "id_string")]
    pub id: String,

    /// Post title
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,

    /// Publish timestamp (None when missing or unparseable)
    #[serde(default, with = "timestamp::option")]
    pub published: Option<NaiveDateTime>,

    /// Text/HTML content of the post
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

/// Fully hydrated post record with its media references
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PostDetail {
    /// Post metadata and body
    pub post: PostBody,

    /// Preview images
    #[serde(default, deserialize_with = "media_list")]
    pub previews: Vec<MediaRef>,

    /// File attachments
    #[serde(default, deserialize_with = "media_list")]
    pub attachments: Vec<MediaRef>,

    /// Videos
    #[serde(default, deserialize_with = "media_list")]
    pub videos: Vec<MediaRef>,
}

impl PostDetail {
    /// All media references in download order: previews, attachments, videos
    pub fn media(&self) -> impl Iterator<Item = &MediaRef> {
        self.previews
            .iter()
            .chain(self.attachments.iter())
            .chain(self.videos.iter())
    }

    /// True when the post carries at least one media reference
    pub fn has_any_media(&self) -> bool {
        !self.previews.is_empty() || !self.attachments.is_empty() || !self.videos.is_empty()
    }
}

/// Reference to a downloadable file on a media server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Server base URL (e.g., "https://n1.kemono.cr")
    pub server: String,
    /// Path below `/data`
    pub path: String,
    /// Original file name, if the service reported one
    #[serde(default)]
    pub name: Option<String>,
}

impl MediaRef {
    /// Full media URL: `{server}/data{path}`
    pub fn url(&self) -> String {
        format!("{}/data{}", self.server.trim_end_matches('/'), self.path)
    }
}

#[derive(Deserialize)]
struct RawMedia {
    server: Option<String>,
    path: Option<String>,
    name: Option<String>,
}

// Embeds and other non-file entries lack server or path and are dropped.
fn media_list<'de, D>(deserializer: D) -> Result<Vec<MediaRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawMedia>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|m| match (m.server, m.path) {
            (Some(server), Some(path)) if !server.is_empty() && !path.is_empty() => {
                Some(MediaRef {
                    server,
                    path,
                    name: m.name.filter(|n| !n.is_empty()),
                })
            }
            _ => None,
        })
        .collect())
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Subject profile as returned by the profile endpoint
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Profile {
    /// Display name on the service
    pub name: String,
    /// Total number of posts, when reported
    #[serde(default)]
    pub post_count: Option<u64>,
}

/// A file that could not be downloaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    /// Media URL
    pub url: String,
    /// Destination path (a partial file may exist here)
    pub path: PathBuf,
}

/// Per-post, per-subject or per-pass file counts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Number of files attempted
    pub total: usize,
    /// Files downloaded or already present
    pub succeeded: usize,
    /// Files that failed after all attempts
    pub failed: Vec<FailedFile>,
}

impl DownloadOutcome {
    /// Fold another outcome into this one
    pub fn merge(&mut self, other: DownloadOutcome) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }

    /// True when nothing failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of one sync pass over one subject
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    /// Subject identity
    pub subject: SubjectKey,
    /// Display name at the time of the pass
    pub display_name: String,
    /// New posts found by the listing walk
    pub posts_checked: usize,
    /// Posts whose files were downloaded
    pub posts_downloaded: usize,
    /// Posts rejected by the filter
    pub posts_filtered: usize,
    /// Aggregated file counts
    pub outcome: DownloadOutcome,
    /// Watermark before the pass
    #[serde(with = "timestamp::option")]
    pub previous_watermark: Option<NaiveDateTime>,
    /// Watermark after the pass (never lower than the previous one)
    #[serde(with = "timestamp::option")]
    pub new_watermark: Option<NaiveDateTime>,
    /// Per-post and listing errors, recorded without aborting the pass
    pub errors: Vec<String>,
}

impl SubjectReport {
    /// True when the pass moved the watermark forward
    pub fn watermark_advanced(&self) -> bool {
        self.new_watermark != self.previous_watermark
    }
}

/// Aggregate over several subjects (manual check-all)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Reports of subjects that completed a pass
    pub reports: Vec<SubjectReport>,
    /// Subjects whose pass could not run, with the reason
    pub failures: Vec<(SubjectKey, String)>,
}

impl SyncSummary {
    /// File counts across every report
    pub fn outcome(&self) -> DownloadOutcome {
        let mut total = DownloadOutcome::default();
        for report in &self.reports {
            total.merge(report.outcome.clone());
        }
        total
    }
}

/// Event emitted during a sync pass
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pass started for a subject
    SyncStarted {
        /// Subject identity
        subject: SubjectKey,
    },

    /// The listing walk found new posts
    PostsFound {
        /// Subject identity
        subject: SubjectKey,
        /// Number of new posts
        count: usize,
    },

    /// A post was rejected by the filter
    PostFiltered {
        /// Post id
        post_id: String,
        /// Post title
        title: String,
    },

    /// Files of a post are about to be downloaded
    PostStarted {
        /// Post id
        post_id: String,
        /// Post title
        title: String,
        /// Number of media files
        files: usize,
    },

    /// Streaming progress for one file
    FileProgress {
        /// Destination path
        path: PathBuf,
        /// Bytes on disk so far (including resumed bytes)
        written: u64,
        /// Expected final size, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// File already present with the expected size
    FileSkipped {
        /// Destination path
        path: PathBuf,
    },

    /// File transfer finished
    FileCompleted {
        /// Destination path
        path: PathBuf,
        /// Final size on disk
        bytes: u64,
    },

    /// File transfer failed after all attempts
    FileFailed {
        /// Media URL
        url: String,
        /// Destination path (partial file kept)
        path: PathBuf,
        /// Last error
        error: String,
    },

    /// All files of a post were processed
    PostCompleted {
        /// Post id
        post_id: String,
        /// Files downloaded or already present
        succeeded: usize,
        /// Files that failed
        failed: usize,
    },

    /// A pass finished for a subject
    SyncCompleted {
        /// The pass report
        report: SubjectReport,
    },

    /// A pass could not run
    SyncFailed {
        /// Subject identity
        subject: SubjectKey,
        /// Error message
        error: String,
    },
}

/// Lenient publish-timestamp parsing and the `YYYY-MM-DDTHH:MM:SS` wire form
pub mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    /// Serialization format for watermarks
    /// (fractional seconds only when present)
    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    /// Parse a publish timestamp, returning None for anything unrecognised
    ///
    /// An explicit offset is dropped and the wall-clock time kept as written.
    pub fn parse(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(dt);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(dt);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.naive_local());
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Some(dt.naive_local());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Format a timestamp in the wire form
    pub fn format(dt: &NaiveDateTime) -> String {
        dt.format(FORMAT).to_string()
    }

    /// Serde adapter for `Option<NaiveDateTime>` that never fails on bad input
    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as `YYYY-MM-DDTHH:MM:SS` or null
        pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_some(&super::format(dt)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize leniently; unparseable strings become None
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            Ok(raw.as_deref().and_then(super::parse))
        }
    }
}
