use axum::body::Body;
use bytes::Bytes;
use dedup_fs::config::AppConfig;
use dedup_fs::routes::build_router;
use dedup_fs::services::StorageManager;
use dedup_fs::state::AppState;
use http::header;
use http::Request;
use http::StatusCode;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = AppConfig::with_data_dir(tmp.path().to_str().unwrap());
    config.log_level = "error".into();
    config.worker_count = 2;
    let manager = StorageManager::open(config).unwrap();
    (AppState::new(manager), tmp)
}

async fn body_to_bytes(body: Body) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = body_to_bytes(body).await;
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
    let resp = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_to_json(resp.into_body()).await)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// Helper: upload bytes and return the stored entry
async fn upload(state: &AppState, name: &str, content: &[u8]) -> Value {
    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/upload/{}", name))
        .body(Body::from(Bytes::from(content.to_vec())))
        .unwrap();
    let (status, body) = send(state, req).await;
    assert!(status == StatusCode::CREATED || status == StatusCode::OK);
    body["data"]["file"].clone()
}

// ==================== Health Tests ====================

#[tokio::test]
async fn test_health_returns_200() {
    let (state, _tmp) = setup();
    let (status, body) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_status_reports_stats() {
    let (state, _tmp) = setup();
    upload(&state, "a.txt", b"first").await;
    upload(&state, "b.txt", b"first").await;

    let (status, body) = send(&state, get("/api/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"]["total_files"], 1);
    assert!(body["data"]["uptime_seconds"].is_number());
    assert!(body["data"]["version"].is_string());
}

// ==================== Upload Tests ====================

#[tokio::test]
async fn test_upload_returns_201_then_200_for_duplicate() {
    let (state, _tmp) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/upload/notes.txt")
        .header("x-meta-author", "ana")
        .body(Body::from("hello world"))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["duplicate"], false);
    assert_eq!(body["data"]["file"]["category"], "documents");
    assert_eq!(body["data"]["file"]["metadata"]["author"], "ana");
    assert!(body["error"].is_null());
    let first_id = body["data"]["file"]["id"].clone();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/upload/other-name.txt")
        .body(Body::from("hello world"))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["duplicate"], true);
    assert_eq!(body["data"]["file"]["id"], first_id);
}

#[tokio::test]
async fn test_upload_with_bad_override_returns_400() {
    let (state, _tmp) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/upload/a.bin")
        .header("x-storage-override", "spreadsheet")
        .body(Body::from("data"))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_upload_with_category_hint() {
    let (state, _tmp) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/upload/photo.png")
        .header(header::CONTENT_TYPE, "image/png")
        .header("x-category-hint", "Holiday 2024")
        .body(Body::from("not really a png"))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["file"]["category"]
        .as_str()
        .unwrap()
        .starts_with("images/"));
}

// ==================== File Tests ====================

#[tokio::test]
async fn test_get_and_download_file() {
    let (state, _tmp) = setup();
    let file = upload(&state, "readme.md", b"# title").await;
    let id = file["id"].as_str().unwrap();

    let (status, body) = send(&state, get(&format!("/api/v1/files/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["original_name"], "readme.md");

    let resp = build_router(state.clone())
        .oneshot(get(&format!("/api/v1/files/{}/content", id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let etag = resp.headers().get(header::ETAG).unwrap().clone();
    assert_eq!(body_to_bytes(resp.into_body()).await.as_ref(), b"# title");

    let req = Request::builder()
        .uri(format!("/api/v1/files/{}/content", id))
        .header(header::IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap();
    let resp = build_router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_get_unknown_file_returns_404() {
    let (state, _tmp) = setup();
    let (status, body) = send(&state, get("/api/v1/files/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_list_and_search_files() {
    let (state, _tmp) = setup();
    upload(&state, "alpha.txt", b"a").await;
    upload(&state, "beta.txt", b"bb").await;
    upload(&state, "gamma.json", b"{\"g\": 1}").await;

    let (status, body) = send(&state, get("/api/v1/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);

    let (status, body) = send(&state, get("/api/v1/files/search?extension=txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);

    let (status, _) = send(&state, get("/api/v1/files/search")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, get("/api/v1/files?sort_by=colour")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_find_by_name() {
    let (state, _tmp) = setup();
    upload(&state, "report.pdf", b"%PDF-1.4 one").await;
    let (status, body) = send(&state, get("/api/v1/files/by-name?name=report.pdf")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_soft_delete_restore_and_hard_delete() {
    let (state, _tmp) = setup();
    let file = upload(&state, "temp.txt", b"short lived").await;
    let id = file["id"].as_str().unwrap();

    let (status, _) = send(
        &state,
        post_json(&format!("/api/v1/files/{}/soft-delete", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        post_json(&format!("/api/v1/files/{}/soft-delete", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let resp = build_router(state.clone())
        .oneshot(get(&format!("/api/v1/files/{}/content", id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (status, body) = send(
        &state,
        post_json(&format!("/api/v1/files/{}/restore", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["deleted_at"].is_null());

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/files/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["space_reclaimed"], 11);

    let (status, _) = send(&state, get(&format!("/api/v1/files/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_delete_reports_each_item() {
    let (state, _tmp) = setup();
    let a = upload(&state, "a.txt", b"aaa").await;
    let (status, body) = send(
        &state,
        post_json(
            "/api/v1/files/batch-delete",
            json!({"ids": [a["id"], "missing"], "soft": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_deleted"], 1);
    assert_eq!(body["data"]["total_failed"], 1);

    let (status, _) = send(
        &state,
        post_json("/api/v1/files/batch-delete", json!({"ids": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rename_rejects_traversal() {
    let (state, _tmp) = setup();
    let file = upload(&state, "a.txt", b"abc").await;
    let id = file["id"].as_str().unwrap();

    let (status, _) = send(
        &state,
        post_json(
            &format!("/api/v1/files/{}/rename", id),
            json!({"new_name": "../../etc/passwd"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &state,
        post_json(
            &format!("/api/v1/files/{}/rename", id),
            json!({"new_name": "b.txt", "update_stored_file": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["original_name"], "b.txt");
    assert!(body["data"]["stored_path"].as_str().unwrap().ends_with("_b.txt"));
}

#[tokio::test]
async fn test_move_and_batch_move() {
    let (state, _tmp) = setup();
    let a = upload(&state, "a.txt", b"one").await;
    let b = upload(&state, "b.txt", b"two").await;

    let (status, body) = send(
        &state,
        post_json(
            &format!("/api/v1/files/{}/move", a["id"].as_str().unwrap()),
            json!({"new_category": "archive/2024"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["category"], "archive/2024");

    let (status, _) = send(
        &state,
        post_json(
            "/api/v1/files/unknown/move",
            json!({"new_category": "anywhere"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // One bad item leaves every file where it was.
    let (status, _) = send(
        &state,
        post_json(
            "/api/v1/files/batch-move",
            json!({"moves": [
                {"id": b["id"], "new_category": "elsewhere"},
                {"id": "unknown", "new_category": "elsewhere"}
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = send(
        &state,
        get(&format!("/api/v1/files/{}", b["id"].as_str().unwrap())),
    )
    .await;
    assert_eq!(body["data"]["category"], "documents");
}

#[tokio::test]
async fn test_copy_file_hard_link() {
    let (state, _tmp) = setup();
    let src = upload(&state, "src.txt", b"shared bytes").await;
    let (status, body) = send(
        &state,
        post_json(
            &format!("/api/v1/files/{}/copy", src["id"].as_str().unwrap()),
            json!({"new_name": "link.txt", "new_category": "links", "hard_link": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["is_hard_link"], true);
    assert_eq!(body["data"]["linked_to"], src["id"]);
    assert_eq!(body["data"]["stored_path"], src["stored_path"]);
    assert_eq!(body["data"]["category"], "links");

    let (_, body) = send(&state, get("/api/v1/files/duplicates")).await;
    assert!(body["data"]["groups"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_metadata_merge_and_replace() {
    let (state, _tmp) = setup();
    let file = upload(&state, "a.txt", b"meta").await;
    let uri = format!("/api/v1/files/{}/metadata", file["id"].as_str().unwrap());

    let req = Request::builder()
        .method("PATCH")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"metadata": {"project": "x", "pages": 3}, "merge": true}).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["metadata"]["project"], "x");
    assert_eq!(body["data"]["metadata"]["pages"], "3");

    let req = Request::builder()
        .method("PATCH")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"metadata": {}, "merge": true}).to_string()))
        .unwrap();
    let (status, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_categories_lists_active_files() {
    let (state, _tmp) = setup();
    upload(&state, "a.txt", b"a").await;
    upload(&state, "b.json", b"{\"b\": 2}").await;
    let (status, body) = send(&state, get("/api/v1/categories")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["documents"]["files"], 1);
    assert_eq!(body["data"]["code"]["files"], 1);
}

// ==================== Version Tests ====================

#[tokio::test]
async fn test_versions_create_list_revert_diff() {
    let (state, _tmp) = setup();
    for (content, who) in [("draft one", "ana"), ("draft two, longer", "ben")] {
        let req = Request::builder()
            .method("POST")
            .uri(format!(
                "/api/v1/versions/doc-1?filename=doc.txt&uploaded_by={}",
                who
            ))
            .body(Body::from(content))
            .unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&state, get("/api/v1/versions/doc-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_version"], 2);
    assert_eq!(body["data"]["versions"][0]["version"], 2);

    let (status, body) = send(
        &state,
        post_json(
            "/api/v1/versions/doc-1/1/revert",
            json!({"uploaded_by": "ana"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["version"], 3);
    assert_eq!(body["data"]["comment"], "Reverted to version 1");

    let resp = build_router(state.clone())
        .oneshot(get("/api/v1/versions/doc-1/3/content"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_bytes(resp.into_body()).await.as_ref(), b"draft one");

    let (status, body) = send(&state, get("/api/v1/versions/doc-1/diff?from=1&to=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content_changed"], true);
    assert_eq!(body["data"]["uploader_changed"], true);
    assert_eq!(body["data"]["size_delta"], 8);

    let (status, _) = send(&state, get("/api/v1/versions/doc-1/9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ==================== Routing Rule Tests ====================

#[tokio::test]
async fn test_routing_rule_directs_uploads() {
    let (state, _tmp) = setup();
    let (status, body) = send(
        &state,
        post_json(
            "/api/v1/routing-rules",
            json!({
                "matcher": {"kind": "extension", "value": "log"},
                "destination": ["logs", "app"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = body["data"]["id"].as_str().unwrap().to_string();

    let file = upload(&state, "server.log", b"started").await;
    assert_eq!(file["category"], "logs/app");

    let (_, body) = send(&state, get("/api/v1/routing-rules")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/routing-rules/{}", rule_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&state, get("/api/v1/routing-rules")).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

// ==================== Ingest Tests ====================

#[tokio::test]
async fn test_ingest_from_inbox() {
    let (state, _tmp) = setup();
    let inbox = state.config.inbox_dir();
    std::fs::write(inbox.join("one.txt"), b"one").unwrap();
    std::fs::write(inbox.join("two.txt"), b"two").unwrap();
    std::fs::write(inbox.join("again.txt"), b"one").unwrap();

    let (status, body) = send(
        &state,
        post_json(
            "/api/v1/ingest",
            json!({"files": [
                {"path": "one.txt"},
                {"path": "two.txt", "metadata": {"batch": 7}},
                {"path": "again.txt"}
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["duplicates"], 1);
    assert_eq!(body["data"]["files"][1]["file"]["original_name"], "two.txt");
    assert_eq!(body["data"]["files"][1]["file"]["metadata"]["batch"], "7");
}

#[tokio::test]
async fn test_ingest_rejects_traversal() {
    let (state, _tmp) = setup();
    let (status, _) = send(
        &state,
        post_json("/api/v1/ingest", json!({"files": [{"path": "../secret"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_ingest_larger_than_queue_returns_429() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = AppConfig::with_data_dir(tmp.path().to_str().unwrap());
    config.job_queue_capacity = 2;
    let state = AppState::new(StorageManager::open(config).unwrap());

    let inbox = state.config.inbox_dir();
    for name in ["a.txt", "b.txt", "c.txt"] {
        std::fs::write(inbox.join(name), name.as_bytes()).unwrap();
    }
    let (status, body) = send(
        &state,
        post_json(
            "/api/v1/ingest",
            json!({"files": [{"path": "a.txt"}, {"path": "b.txt"}, {"path": "c.txt"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], 429);

    let (_, body) = send(&state, get("/api/v1/files")).await;
    assert_eq!(body["data"]["total"], 0);
}
