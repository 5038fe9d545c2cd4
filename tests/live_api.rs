//! Tests against the real API
//!
//! Compiled only with the `live-tests` feature and marked `#[ignore]`.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --features live-tests --test live_api -- --ignored --nocapture
//! ```
//!
//! # Required environment variables (.env file)
//!
//! - `KEMONO_TEST_SUBJECT_URL` - Subject page, e.g. `https://kemono.cr/fanbox/user/123`
//! - `KEMONO_API_URL` - API base (optional, default: `https://kemono.cr/api/v1`)

#![cfg(feature = "live-tests")]

mod common;

use common::{has_live_subject, load_live_subject};
use kemono_sync::{ApiClient, ReqwestSession, Subject, parse_subject_url};
use kemono_sync::fetcher::fetch_new_posts;
use serial_test::serial;
use std::sync::Arc;

#[tokio::test]
#[ignore]
#[serial]
async fn test_profile_and_first_page() {
    if !has_live_subject() {
        eprintln!("Skipping: KEMONO_TEST_SUBJECT_URL not found in .env");
        return;
    }
    let (config, url) = load_live_subject().unwrap();
    let key = parse_subject_url(&url).unwrap();

    let session = Arc::new(ReqwestSession::new(&config.api).unwrap());
    session.bootstrap().await.unwrap();
    let client = ApiClient::new(session, config.api.clone());

    let profile = client.fetch_profile(&key).await.unwrap();
    println!("Profile: {}", profile.name);
    assert!(!profile.name.is_empty());

    let fetched = fetch_new_posts(&client, &Subject::new(key.clone(), profile.name)).await;
    assert!(fetched.is_complete(), "listing failed: {:?}", fetched.error);
    println!("First page: {} posts", fetched.posts.len());

    if let Some(first) = fetched.posts.first() {
        let detail = client.fetch_post(&key, &first.id).await.unwrap();
        assert_eq!(detail.post.id, first.id);
        println!("Newest post '{}' has {} media files", detail.post.title, detail.media().count());
    }
}
