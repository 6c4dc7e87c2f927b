mod common;

use common::spawn_app;
use serde_json::{json, Value};

#[tokio::test]
async fn test_tracking_same_session_counts_once() {
    let app = spawn_app().await;

    let resp = app
        .post(
            "/api/blog-analytics/track",
            &json!({ "slug": "a", "sessionId": "s1", "readTime": 10 }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["isNewView"], true);

    let body: Value = app
        .post(
            "/api/blog-analytics/track",
            &json!({ "slug": "a", "sessionId": "s1", "readTime": 25 }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["isNewView"], false);
    assert_eq!(body["totalViews"], 1);
    assert_eq!(body["totalReadTime"], 25);

    let record: Value = app.get("/api/blog-analytics/a").await.json().await.unwrap();
    assert_eq!(record["totalViews"], 1);
    assert_eq!(record["totalReadTime"], 25);
    assert_eq!(record["sessions"].as_array().unwrap().len(), 1);
    assert!(app.object_path("blog-analytics/a.json").exists());
}

#[tokio::test]
async fn test_tracking_sums_read_time_across_sessions() {
    let app = spawn_app().await;

    for (session, read_time) in [("s1", 10), ("s2", 5), ("s3", 0), ("s2", 8)] {
        let resp = app
            .post(
                "/api/blog-analytics/track",
                &json!({ "slug": "b", "sessionId": session, "readTime": read_time }),
            )
            .await;
        assert_eq!(resp.status(), 200);
    }

    let record: Value = app.get("/api/blog-analytics/b").await.json().await.unwrap();
    assert_eq!(record["totalViews"], 3);
    assert_eq!(record["totalReadTime"], 18);
}

#[tokio::test]
async fn test_tracking_validation() {
    let app = spawn_app().await;

    for body in [
        json!({ "slug": "", "sessionId": "s1", "readTime": 1 }),
        json!({ "slug": "a", "sessionId": " ", "readTime": 1 }),
        json!({ "slug": "a", "sessionId": "s1", "readTime": -1 }),
        json!({ "slug": "../x", "sessionId": "s1", "readTime": 1 }),
        json!({ "slug": "a", "sessionId": "s1", "readTime": 86_401 }),
        json!({ "slug": "a", "sessionId": "s1", "readTime": i64::MAX }),
    ] {
        let resp = app.post("/api/blog-analytics/track", &body).await;
        assert_eq!(resp.status(), 400, "{body}");
    }
}

#[tokio::test]
async fn test_untracked_article_is_zeroed() {
    let app = spawn_app().await;

    let record: Value = app
        .get("/api/blog-analytics/never-read")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(record["slug"], "never-read");
    assert_eq!(record["totalViews"], 0);
    assert_eq!(record["sessions"], json!([]));
}

#[tokio::test]
async fn test_articles_published_newest_first() {
    let app = spawn_app().await;

    let resp = app
        .admin_post(
            "/api/blog",
            &json!({ "title": "First Post", "content": "hello world", "published": true }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let first: Value = resp.json().await.unwrap();
    assert_eq!(first["slug"], "first-post");
    assert_eq!(first["readMinutes"], 1);
    assert!(first["publishedAt"].is_string());

    // publishedAt has millisecond resolution.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    app.admin_post(
        "/api/blog",
        &json!({ "slug": "second", "title": "Second", "published": true }),
    )
    .await;
    app.admin_post("/api/blog", &json!({ "slug": "draft", "title": "Draft" }))
        .await;

    let list: Vec<Value> = app.get("/api/blog").await.json().await.unwrap();
    let slugs: Vec<&str> = list.iter().map(|a| a["slug"].as_str().unwrap()).collect();
    assert_eq!(slugs, vec!["second", "first-post"]);

    assert_eq!(app.get("/api/blog/draft").await.status(), 404);
    let resp = app
        .client
        .get(app.url("/api/blog/draft"))
        .bearer_auth(common::ADMIN_PASSWORD)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = app
        .admin_put("/api/blog/draft", &json!({ "published": true }))
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(app.get("/api/blog/draft").await.status(), 200);

    let resp = app
        .admin_post("/api/blog", &json!({ "slug": "second", "title": "Dup" }))
        .await;
    assert_eq!(resp.status(), 400);

    assert_eq!(app.admin_delete("/api/blog/second").await.status(), 200);
    assert_eq!(app.get("/api/blog/second").await.status(), 404);
}

#[tokio::test]
async fn test_newsletter_rejects_bad_email() {
    let app = spawn_app().await;

    let resp = app
        .post("/api/newsletter", &json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "a valid email is required");
}
