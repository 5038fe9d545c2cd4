//! API payloads and mock mounting for integration tests

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Listing entry
pub fn summary(id: &str, published: &str) -> Value {
    json!({"id": id, "title": format!("Post {id}"), "published": published})
}

/// Post detail with one image attachment served by `media_server`
pub fn post_detail(media_server: &str, id: &str, title: &str, published: &str) -> Value {
    json!({
        "post": {
            "id": id,
            "title": title,
            "published": published,
            "content": format!("<p>body of {id}</p>")
        },
        "previews": [],
        "attachments": [
            {"server": media_server, "name": format!("{id}.png"), "path": format!("/aa/bb/{id}.png")}
        ],
        "videos": []
    })
}

/// Media bytes served for post `id`
pub fn media_bytes(id: &str) -> Vec<u8> {
    format!("image data for post {id}").into_bytes()
}

/// Mount the listing of `fanbox/user/{user}`
pub async fn mount_listing(server: &MockServer, user: &str, posts: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/fanbox/user/{user}/posts")))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts))
        .mount(server)
        .await;
}

/// Mount a post detail and its media file
pub async fn mount_post(server: &MockServer, user: &str, id: &str, title: &str, published: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/fanbox/user/{user}/post/{id}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(post_detail(&server.uri(), id, title, published)),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/data/aa/bb/{id}.png")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(media_bytes(id)))
        .mount(server)
        .await;
}

/// Mount the profile of `fanbox/user/{user}`
pub async fn mount_profile(server: &MockServer, user: &str, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/fanbox/user/{user}/profile")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": user,
            "name": name,
            "service": "fanbox",
            "post_count": 3
        })))
        .mount(server)
        .await;
}
