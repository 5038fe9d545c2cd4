//! Incremental listing walk
//!
//! Listing pages come newest first. With a watermark the walk keeps paging
//! until it meets a post at or below the watermark; without one it reads only
//! the first page so a new subject does not pull its whole history.

use crate::api::ApiClient;
use crate::error::Error;
use crate::types::{PostSummary, Subject};

/// Posts found by one walk
#[derive(Debug, Default)]
pub struct FetchedPosts {
    /// New posts, newest first
    pub posts: Vec<PostSummary>,
    /// Error that cut the walk short; `posts` still holds what was gathered
    pub error: Option<Error>,
}

impl FetchedPosts {
    /// True when the walk ended without an error
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Collect the posts of `subject` newer than its watermark
pub async fn fetch_new_posts(client: &ApiClient, subject: &Subject) -> FetchedPosts {
    let key = &subject.key;
    let page_size = client.config().page_size.max(1);
    let mut fetched = FetchedPosts::default();
    let mut offset = 0;

    loop {
        let page = match client.fetch_posts_page(key, offset).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(subject = %key, offset, error = %e, "Listing walk stopped early");
                fetched.error = Some(e);
                break;
            }
        };

        if page.is_empty() {
            break;
        }

        let Some(watermark) = subject.watermark else {
            tracing::debug!(subject = %key, count = page.len(), "No watermark, keeping first page only");
            fetched.posts.extend(page);
            break;
        };

        let mut reached_watermark = false;
        for post in page {
            match post.published {
                Some(published) if published > watermark => fetched.posts.push(post),
                _ => {
                    reached_watermark = true;
                    break;
                }
            }
        }
        if reached_watermark {
            break;
        }

        offset += page_size;
    }

    tracing::debug!(subject = %key, found = fetched.posts.len(), "Listing walk finished");
    fetched
}
