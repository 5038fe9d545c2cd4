//! Test configuration helpers for mock-server and live API runs

use kemono_sync::config::{ApiRetryConfig, RetryConfig};
use kemono_sync::{Config, JsonSubjectStore, ReqwestSession, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Error type for test configuration
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Config pointing at a mock server rooted at `server_uri`
///
/// Downloads and the subject list live under `dir`; delays and retry waits
/// are shortened so failure paths finish quickly.
pub fn mock_config(server_uri: &str, dir: &TempDir) -> Config {
    let fast = RetryConfig {
        max_attempts: 2,
        ..RetryConfig::linear(Duration::from_millis(10))
    };

    let mut config = Config::default();
    config.api.base_url = format!("{server_uri}/api/v1");
    config.api.site_url = server_uri.to_string();
    config.api.detail_delay = Duration::ZERO;
    config.api.retry = ApiRetryConfig {
        profile: fast.clone(),
        post: fast.clone(),
        posts_page: fast,
    };
    config.download.download_dir = dir.path().join("downloads");
    config.download.file_max_attempts = 2;
    config.download.file_retry_unit = Duration::from_millis(10);
    config.persistence.subjects_file = dir.path().join("artists.json");
    config
}

/// Engine over a real reqwest session and a JSON store, as the daemon builds it
pub fn create_engine(config: Config) -> Result<SyncEngine, ConfigError> {
    let session = ReqwestSession::new(&config.api)
        .map_err(|e| ConfigError(format!("failed to build session: {e}")))?;
    let store = JsonSubjectStore::new(&config.persistence.subjects_file);
    Ok(SyncEngine::new(config, Arc::new(session), Arc::new(store)))
}

/// Subject page URL for live tests
///
/// Reads `KEMONO_TEST_SUBJECT_URL` (e.g. `https://kemono.cr/fanbox/user/123`)
/// and optionally `KEMONO_API_URL` from the environment or a `.env` file.
pub fn load_live_subject() -> Result<(Config, String), ConfigError> {
    dotenvy::dotenv().ok();

    let url = std::env::var("KEMONO_TEST_SUBJECT_URL")
        .map_err(|_| ConfigError("KEMONO_TEST_SUBJECT_URL not set in environment".to_string()))?;

    let mut config = Config::default();
    if let Ok(api) = std::env::var("KEMONO_API_URL") {
        config.api.base_url = api;
    }
    Ok((config, url))
}

/// Check whether live API settings are available
pub fn has_live_subject() -> bool {
    load_live_subject().is_ok()
}
