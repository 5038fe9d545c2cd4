//! Remote API client
//!
//! Three endpoints, each behind its own retry policy:
//!
//! | Call | Path | Default retry |
//! |------|------|---------------|
//! | profile | `{base}/{service}/user/{id}/profile` | linear, 2 s |
//! | post detail | `{base}/{service}/user/{id}/post/{post_id}` | exponential, 5 s |
//! | listing page | `{base}/{service}/user/{id}/posts[?o=offset]` | linear, 2 s |

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::http::{HttpSession, RequestOptions};
use crate::retry::with_retry;
use crate::types::{PostDetail, PostSummary, Profile, SubjectKey};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Accept header the API expects for JSON endpoints
const API_ACCEPT: &str = "text/css";

/// Client for the profile, post and listing endpoints
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<dyn HttpSession>,
    config: ApiConfig,
}

impl ApiClient {
    /// Create a client over a session
    pub fn new(session: Arc<dyn HttpSession>, config: ApiConfig) -> Self {
        Self { session, config }
    }

    /// API settings in use
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<dyn HttpSession> {
        &self.session
    }

    fn user_url(&self, key: &SubjectKey) -> String {
        format!(
            "{}/{}/user/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&key.service),
            urlencoding::encode(&key.user_id)
        )
    }

    /// Profile endpoint URL
    pub fn profile_url(&self, key: &SubjectKey) -> String {
        format!("{}/profile", self.user_url(key))
    }

    /// Post detail endpoint URL
    pub fn post_url(&self, key: &SubjectKey, post_id: &str) -> String {
        format!("{}/post/{}", self.user_url(key), urlencoding::encode(post_id))
    }

    /// Listing endpoint URL; offset 0 carries no query
    pub fn posts_url(&self, key: &SubjectKey, offset: usize) -> String {
        if offset > 0 {
            format!("{}/posts?o={offset}", self.user_url(key))
        } else {
            format!("{}/posts", self.user_url(key))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let options = RequestOptions::with_timeout(self.config.request_timeout)
            .header("Accept", API_ACCEPT);
        let response = self.session.get(url, options).await?;
        response.error_for_status(url)?.json().await
    }

    /// Fetch a subject's profile
    pub async fn fetch_profile(&self, key: &SubjectKey) -> Result<Profile> {
        let url = self.profile_url(key);
        let url = url.as_str();
        tracing::debug!(subject = %key, "Fetching profile");
        with_retry(&self.config.retry.profile, "fetch_profile", move || {
            self.get_json(url)
        })
        .await
    }

    /// Fetch one post with its media references
    ///
    /// Every attempt waits `detail_delay` before issuing the request.
    pub async fn fetch_post(&self, key: &SubjectKey, post_id: &str) -> Result<PostDetail> {
        let url = self.post_url(key, post_id);
        let url = url.as_str();
        tracing::debug!(subject = %key, post_id, "Fetching post detail");
        with_retry(&self.config.retry.post, "fetch_post", move || async move {
            tokio::time::sleep(self.config.detail_delay).await;
            self.get_json(url).await
        })
        .await
    }

    /// Fetch one listing page, newest first
    pub async fn fetch_posts_page(
        &self,
        key: &SubjectKey,
        offset: usize,
    ) -> Result<Vec<PostSummary>> {
        let url = self.posts_url(key, offset);
        let url = url.as_str();
        tracing::debug!(subject = %key, offset, "Fetching posts page");
        with_retry(&self.config.retry.posts_page, "fetch_posts_page", move || {
            self.get_json(url)
        })
        .await
    }
}

/// Extract the subject key from a URL of the form
/// `https://host/{service}/user/{user_id}`
///
/// # Examples
///
/// ```
/// use kemono_sync::api::parse_subject_url;
///
/// let key = parse_subject_url("https://kemono.cr/fanbox/user/25877697").unwrap();
/// assert_eq!(key.service, "fanbox");
/// assert_eq!(key.user_id, "25877697");
/// ```
pub fn parse_subject_url(input: &str) -> Result<SubjectKey> {
    let invalid = || {
        Error::InvalidUrl(format!(
            "{input} (expected https://host/<service>/user/<user_id>)"
        ))
    };

    let parsed = url::Url::parse(input.trim()).map_err(|_| invalid())?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [service, "user", user_id, ..] => {
            let service = urlencoding::decode(service).map_err(|_| invalid())?;
            let user_id = urlencoding::decode(user_id).map_err(|_| invalid())?;
            Ok(SubjectKey::new(service.into_owned(), user_id.into_owned()))
        }
        _ => Err(invalid()),
    }
}
