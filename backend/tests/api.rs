use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use backend::{router, AppState, DocumentRepo, MemoryRepo, RepoError};
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use shared::{AddDocumentResponse, Document, Fields, Snapshot, UserId};
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    router(AppState::new(Arc::new(MemoryRepo::new())))
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn add(app: &Router, uid: &str, title: &str) -> Uuid {
    let (status, body) = send(
        app,
        request("POST", &format!("/api/users/{uid}/tasks"), Some(json!({ "title": title, "completed": false }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice::<AddDocumentResponse>(&body).unwrap().id
}

async fn list(app: &Router, uid: &str) -> Snapshot {
    let (status, body) = send(app, request("GET", &format!("/api/users/{uid}/tasks"), None)).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn created_documents_are_listed_newest_first_with_server_fields() {
    let app = app();
    add(&app, "u1", "first").await;
    let second = add(&app, "u1", "second").await;

    let snapshot = list(&app, "u1").await;
    let titles: Vec<_> = snapshot
        .documents
        .iter()
        .map(|d| d.str_field("title").unwrap())
        .collect();
    assert_eq!(titles, vec!["second", "first"]);
    assert_eq!(snapshot.documents[0].id, second);
    assert_eq!(snapshot.documents[0].str_field("ownerId"), Some("u1"));
    assert!(snapshot.documents[0].str_field("createdAt").is_some());
    assert!(list(&app, "u2").await.is_empty());
}

#[tokio::test]
async fn patch_merges_fields_and_protects_the_owner() {
    let app = app();
    let id = add(&app, "u1", "a").await;
    let created_at = list(&app, "u1").await.documents[0]
        .str_field("createdAt")
        .map(str::to_string);

    let (status, _) = send(
        &app,
        request(
            "PATCH",
            &format!("/api/users/u1/tasks/{id}"),
            Some(json!({ "completed": true, "ownerId": "u2" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, request("GET", &format!("/api/users/u1/tasks/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let doc: Document = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc.bool_field("completed"), Some(true));
    assert_eq!(doc.str_field("title"), Some("a"));
    assert_eq!(doc.str_field("ownerId"), Some("u1"));
    assert_eq!(doc.str_field("createdAt").map(str::to_string), created_at);
}

#[tokio::test]
async fn patching_a_missing_document_is_not_found_but_delete_is_idempotent() {
    let app = app();
    let id = add(&app, "u1", "a").await;

    let (status, _) = send(&app, request("DELETE", &format!("/api/users/u1/tasks/{id}"), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, request("DELETE", &format!("/api/users/u1/tasks/{id}"), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        request("PATCH", &format!("/api/users/u1/tasks/{id}"), Some(json!({ "completed": true }))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(list(&app, "u1").await.is_empty());
}

#[tokio::test]
async fn documents_of_other_owners_are_out_of_reach() {
    let app = app();
    let id = add(&app, "u1", "private").await;

    let (status, _) = send(&app, request("GET", &format!("/api/users/u2/tasks/{id}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, request("DELETE", &format!("/api/users/u2/tasks/{id}"), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(list(&app, "u1").await.len(), 1);
}

#[tokio::test]
async fn stream_opens_with_the_current_snapshot() {
    use futures::StreamExt;

    let app = app();
    add(&app, "u1", "a").await;

    let response = app
        .clone()
        .oneshot(request("GET", "/api/users/u1/tasks/stream", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.starts_with("event: snapshot\n"), "{text}");
    assert!(text.contains(r#""title":"a""#), "{text}");
}

/// Reads lag behind writes, widening any read-then-write window.
struct SlowReads(MemoryRepo);

#[async_trait]
impl DocumentRepo for SlowReads {
    async fn list(&self, owner: &UserId) -> Result<Vec<Document>, RepoError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.list(owner).await
    }

    async fn get(&self, owner: &UserId, id: Uuid) -> Result<Option<Document>, RepoError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.get(owner, id).await
    }

    async fn insert(&self, owner: &UserId, doc: &Document) -> Result<(), RepoError> {
        self.0.insert(owner, doc).await
    }

    async fn patch(
        &self,
        owner: &UserId,
        id: Uuid,
        patch: Fields,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, RepoError> {
        self.0.patch(owner, id, patch, now).await
    }

    async fn remove(&self, owner: &UserId, id: Uuid) -> Result<bool, RepoError> {
        self.0.remove(owner, id).await
    }
}

#[tokio::test]
async fn concurrent_patches_to_different_fields_both_land() {
    let app = router(AppState::new(Arc::new(SlowReads(MemoryRepo::new()))));
    let id = add(&app, "u1", "a").await;
    let uri = format!("/api/users/u1/tasks/{id}");

    let (completed, renamed) = tokio::join!(
        send(&app, request("PATCH", &uri, Some(json!({ "completed": true })))),
        send(&app, request("PATCH", &uri, Some(json!({ "title": "b" })))),
    );
    assert_eq!(completed.0, StatusCode::NO_CONTENT);
    assert_eq!(renamed.0, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, request("GET", &uri, None)).await;
    let doc: Document = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc.str_field("title"), Some("b"));
    assert_eq!(doc.bool_field("completed"), Some(true));
}

#[tokio::test]
async fn stream_sends_a_fresh_snapshot_after_each_write() {
    use futures::StreamExt;

    let app = app();
    let response = app
        .clone()
        .oneshot(request("GET", "/api/users/u1/tasks/stream", None))
        .await
        .unwrap();
    let mut body = response.into_body().into_data_stream();

    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains(r#""documents":[]"#), "{text}");

    add(&app, "u1", "later").await;
    let next = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("no snapshot after the write")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(next.to_vec()).unwrap();
    assert!(text.starts_with("event: snapshot\n"), "{text}");
    assert!(text.contains(r#""title":"later""#), "{text}");

    add(&app, "u2", "elsewhere").await;
    let quiet = tokio::time::timeout(Duration::from_millis(100), body.next()).await;
    assert!(quiet.is_err(), "another owner's write reached this stream");
}
