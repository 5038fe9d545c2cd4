//! Configuration types for kemono-sync

use crate::error::{Error, Result};
use crate::filter::FilterRule;
use crate::recurrence::RecurrenceRule;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download layout and naming settings
///
/// These are the settings a subject may override through its `config_override`
/// block (see [`DownloadOverrides`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// strftime-style format used for `{published}` in post folders (default: "%Y.%m.%d")
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Subject folder template; placeholders `{name}`, `{service}`, `{id}` (default: "{name}")
    #[serde(default = "default_artist_folder_format")]
    pub artist_folder_format: String,

    /// Post folder template; placeholders `{id}`, `{title}`, `{published}`
    /// (default: "[{published}] {title}")
    #[serde(default = "default_post_folder_format")]
    pub post_folder_format: String,

    /// File name template; placeholders `{idx}`, `{name}` (default: "{idx}")
    #[serde(default = "default_file_name_format")]
    pub file_name_format: String,

    /// Only apply `file_name_format` to image files (default: true)
    #[serde(default = "default_true")]
    pub rename_images_only: bool,

    /// Extensions treated as images, lowercase with leading dot
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Replacement for characters that are illegal in path components
    #[serde(default = "default_char_replacement")]
    pub char_replacement: HashMap<String, String>,

    /// Write the post body to `content.txt` next to the files (default: true)
    #[serde(default = "default_true")]
    pub save_content_to_file: bool,

    /// Attempts per file before it is reported as failed (default: 5)
    #[serde(default = "default_file_max_attempts")]
    pub file_max_attempts: u32,

    /// Unit of the per-file backoff; attempt `n` waits `unit * 2^(n+1)` (default: 1 second)
    #[serde(default = "default_file_retry_unit", with = "duration_serde")]
    pub file_retry_unit: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            date_format: default_date_format(),
            artist_folder_format: default_artist_folder_format(),
            post_folder_format: default_post_folder_format(),
            file_name_format: default_file_name_format(),
            rename_images_only: true,
            image_extensions: default_image_extensions(),
            char_replacement: default_char_replacement(),
            save_content_to_file: true,
            file_max_attempts: default_file_max_attempts(),
            file_retry_unit: default_file_retry_unit(),
        }
    }
}

impl DownloadConfig {
    /// Merge a subject's overrides over these settings
    pub fn with_overrides(&self, overrides: &DownloadOverrides) -> DownloadConfig {
        let mut merged = self.clone();
        if let Some(dir) = &overrides.download_dir {
            merged.download_dir = dir.clone();
        }
        if let Some(v) = &overrides.date_format {
            merged.date_format = v.clone();
        }
        if let Some(v) = &overrides.artist_folder_format {
            merged.artist_folder_format = v.clone();
        }
        if let Some(v) = &overrides.post_folder_format {
            merged.post_folder_format = v.clone();
        }
        if let Some(v) = &overrides.file_name_format {
            merged.file_name_format = v.clone();
        }
        if let Some(v) = overrides.rename_images_only {
            merged.rename_images_only = v;
        }
        if let Some(v) = &overrides.image_extensions {
            merged.image_extensions = v.clone();
        }
        if let Some(v) = &overrides.char_replacement {
            merged.char_replacement = v.clone();
        }
        if let Some(v) = overrides.save_content_to_file {
            merged.save_content_to_file = v;
        }
        merged
    }
}

/// Per-subject overrides of [`DownloadConfig`]; unset fields inherit the global value
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadOverrides {
    /// Root download directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    /// Date format for post folders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    /// Subject folder template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_folder_format: Option<String>,
    /// Post folder template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_folder_format: Option<String>,
    /// File name template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_format: Option<String>,
    /// Only rename image files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_images_only: Option<bool>,
    /// Image extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_extensions: Option<Vec<String>>,
    /// Character replacement map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_replacement: Option<HashMap<String, String>>,
    /// Write post content to a sidecar file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_content_to_file: Option<bool>,
}

/// Backoff shape between retries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Wait `base * attempt` seconds
    #[default]
    Linear,
    /// Wait `base ^ attempt` seconds
    Exponential,
}

/// Retry configuration for one API call site
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Linear or exponential growth (default: linear)
    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound for a single wait (default: 10 minutes)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// HTTP statuses worth retrying (default: 429, 500, 502, 503, 504)
    #[serde(default = "default_retry_status")]
    pub retry_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff: Backoff::Linear,
            max_delay: default_max_delay(),
            retry_status: default_retry_status(),
        }
    }
}

impl RetryConfig {
    /// Linear backoff with the given base and default limits
    pub fn linear(base_delay: Duration) -> Self {
        Self {
            base_delay,
            backoff: Backoff::Linear,
            ..Self::default()
        }
    }

    /// Exponential backoff with the given base and default limits
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            backoff: Backoff::Exponential,
            ..Self::default()
        }
    }
}

/// Retry settings for each API call site
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiRetryConfig {
    /// Profile lookups (default: linear, 2 s base)
    #[serde(default = "default_profile_retry")]
    pub profile: RetryConfig,
    /// Post detail lookups (default: exponential, 5 s base)
    #[serde(default = "default_post_retry")]
    pub post: RetryConfig,
    /// Listing pages (default: linear, 2 s base)
    #[serde(default = "default_page_retry")]
    pub posts_page: RetryConfig,
}

impl Default for ApiRetryConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_retry(),
            post: default_post_retry(),
            posts_page: default_page_retry(),
        }
    }
}

/// Remote API and transport settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root (default: "https://kemono.cr/api/v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Site root requested once to collect session cookies (default: "https://kemono.cr")
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for profile, listing and detail calls (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Timeout for the HEAD size probe (default: 10 seconds)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Timeout for streaming a media file (default: 300 seconds)
    #[serde(default = "default_file_timeout", with = "duration_serde")]
    pub file_timeout: Duration,

    /// Fixed delay before each post detail request (default: 1 second)
    #[serde(default = "default_detail_delay", with = "duration_serde")]
    pub detail_delay: Duration,

    /// Listing page size used to advance the offset (default: 50)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Retry settings per call site
    #[serde(default)]
    pub retry: ApiRetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            site_url: default_site_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            probe_timeout: default_probe_timeout(),
            file_timeout: default_file_timeout(),
            detail_delay: default_detail_delay(),
            page_size: default_page_size(),
            retry: ApiRetryConfig::default(),
        }
    }
}

/// Background scheduling settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Rule for subjects without their own timer (default: daily at 02:00)
    #[serde(default = "default_global_timer")]
    pub global_timer: Option<RecurrenceRule>,

    /// Whether `global_timer` triggers subjects that have no timer of their own
    /// (default: true)
    #[serde(default = "default_true")]
    pub schedule_global_timer: bool,

    /// How often the scheduler evaluates due times (default: 60 seconds)
    #[serde(default = "default_tick_interval", with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            global_timer: default_global_timer(),
            schedule_global_timer: true,
            tick_interval: default_tick_interval(),
        }
    }
}

/// Where subject state lives
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Artist list file (default: "./artists.json")
    #[serde(default = "default_subjects_file")]
    pub subjects_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            subjects_file: default_subjects_file(),
        }
    }
}

/// Main configuration
///
/// Download and schedule settings are flattened so the on-disk JSON stays a
/// single flat object (`download_dir`, `date_format`, `global_timer`, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Download layout and naming
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Scheduling
    #[serde(flatten)]
    pub schedule: ScheduleConfig,

    /// Remote API and transport
    #[serde(default)]
    pub api: ApiConfig,

    /// Global post filter
    #[serde(default, rename = "global_filter")]
    pub filter: FilterRule,

    /// Subject persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults and writes them to `path` so the user
    /// has something to edit.
    pub async fn load(path: &Path) -> Result<Config> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let config: Config = serde_json::from_slice(&bytes)?;
                config.validate()?;
                tracing::info!(path = %path.display(), "Configuration loaded");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, writing defaults");
                let config = Config::default();
                config.save(path).await?;
                Ok(config)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write configuration as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Basic sanity checks
    pub fn validate(&self) -> Result<()> {
        if self.download.download_dir.as_os_str().is_empty() {
            return Err(Error::config("must not be empty", "download_dir"));
        }
        if self.download.artist_folder_format.trim().is_empty() {
            return Err(Error::config("must not be empty", "artist_folder_format"));
        }
        if self.download.post_folder_format.trim().is_empty() {
            return Err(Error::config("must not be empty", "post_folder_format"));
        }
        if self.api.page_size == 0 {
            return Err(Error::config("must be greater than zero", "api.page_size"));
        }
        if self.schedule.tick_interval.is_zero() {
            return Err(Error::config("must be greater than zero", "tick_interval"));
        }
        if let Some(rule) = &self.schedule.global_timer {
            rule.validate()
                .map_err(|e| Error::config(e.to_string(), "global_timer"))?;
        }
        Ok(())
    }

    /// Effective download settings for a subject
    pub fn download_for(&self, overrides: &DownloadOverrides) -> DownloadConfig {
        self.download.with_overrides(overrides)
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_date_format() -> String {
    "%Y.%m.%d".to_string()
}

fn default_artist_folder_format() -> String {
    "{name}".to_string()
}

fn default_post_folder_format() -> String {
    "[{published}] {title}".to_string()
}

fn default_file_name_format() -> String {
    "{idx}".to_string()
}

fn default_image_extensions() -> Vec<String> {
    [".jpe", ".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_char_replacement() -> HashMap<String, String> {
    [
        ("/", "／"),
        ("\\", "＼"),
        (":", "："),
        ("*", "＊"),
        ("?", "？"),
        ("\"", "＂"),
        ("<", "＜"),
        (">", "＞"),
        ("|", "｜"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_file_max_attempts() -> u32 {
    5
}

fn default_file_retry_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(600)
}

fn default_retry_status() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_profile_retry() -> RetryConfig {
    RetryConfig::linear(Duration::from_secs(2))
}

fn default_post_retry() -> RetryConfig {
    RetryConfig::exponential(Duration::from_secs(5))
}

fn default_page_retry() -> RetryConfig {
    RetryConfig::linear(Duration::from_secs(2))
}

fn default_base_url() -> String {
    "https://kemono.cr/api/v1".to_string()
}

fn default_site_url() -> String {
    "https://kemono.cr".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:135.0) Gecko/20100101 Firefox/135.0"
        .to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_file_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_detail_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_page_size() -> usize {
    50
}

fn default_global_timer() -> Option<RecurrenceRule> {
    NaiveTime::from_hms_opt(2, 0, 0).map(|time| RecurrenceRule::Daily { time })
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_subjects_file() -> PathBuf {
    PathBuf::from("./artists.json")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
