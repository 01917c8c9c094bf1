//! Router-level tests: multipart CRUD over every layer except a real socket.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use catalog_core::store::LocalStore;
use catalog_daemon::server::build_router;
use catalog_db::Database;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "catalog-test-boundary";

async fn test_router() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(LocalStore::open(dir.path()).unwrap());
    let router = build_router(db, store, Some(dir.path().to_path_buf()));
    (router, dir)
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"img\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn form_request(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn jpeg() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend(std::iter::repeat(0xAB).take(5 * 1024));
    bytes
}

#[tokio::test]
async fn healthz_is_up() {
    let (router, _dir) = test_router().await;
    let response = router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn card_crud_flow_over_http() {
    let (router, _dir) = test_router().await;
    let payload = jpeg();

    // Create.
    let body = multipart_body(
        &[
            ("title", "Ace"),
            ("state", "Available"),
            ("date", "2024-01-01"),
        ],
        Some(("ace.jpg", &payload)),
    );
    let response = router
        .clone()
        .oneshot(form_request("POST", "/v1/cards", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["id"].as_i64().unwrap();
    let img = created["img"].as_str().unwrap().to_string();
    assert!(img.starts_with("/storage/images/card-"), "img: {img}");
    assert_eq!(created["state"], "Available");
    assert_eq!(created["date"], "2024-01-01");

    // The stored asset is retrievable and byte-identical.
    let response = router.clone().oneshot(get(&img)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), payload.as_slice());

    // List and show.
    let response = router.clone().oneshot(get("/v1/cards")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

    let response = router
        .clone()
        .oneshot(get(&format!("/v1/cards/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Partial update: only the state changes.
    let body = multipart_body(&[("state", "Coming Soon")], None);
    let response = router
        .clone()
        .oneshot(form_request("PATCH", &format!("/v1/cards/{id}"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["state"], "Coming Soon");
    assert_eq!(updated["title"], "Ace");
    assert_eq!(updated["img"], img.as_str());

    // Delete, then everything is gone.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/cards/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(get(&format!("/v1/cards/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get(&img)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_create_returns_field_errors() {
    let (router, _dir) = test_router().await;

    let body = multipart_body(
        &[("state", "Broken"), ("date", "2024-01-01")],
        Some(("notes.txt", b"not an image")),
    );
    let response = router
        .oneshot(form_request("POST", "/v1/cards", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let payload = json_body(response).await;
    assert_eq!(payload["message"], "Validation errors");
    assert_eq!(payload["errors"]["title"][0], "The title field is required.");
    assert_eq!(payload["errors"]["state"][0], "The selected state is invalid.");
    assert_eq!(payload["errors"]["img"][0], "The img field must be an image.");
}

#[tokio::test]
async fn unknown_ids_yield_not_found() {
    let (router, _dir) = test_router().await;

    let response = router.clone().oneshot(get("/v1/items/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = json_body(response).await;
    assert_eq!(payload["message"], "item 42 not found");

    let body = multipart_body(&[("title", "New title")], None);
    let response = router
        .clone()
        .oneshot(form_request("PUT", "/v1/items/42", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/items/42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn spanish_groups_are_isolated_siblings() {
    let (router, _dir) = test_router().await;
    let payload = jpeg();

    let body = multipart_body(
        &[
            ("title", "Sobres"),
            ("price", "4.99"),
            ("status", "Out of stock"),
        ],
        Some(("sobres.jpg", &payload)),
    );
    let response = router
        .clone()
        .oneshot(form_request("POST", "/v1/spanish_items", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "Out of stock");
    assert_eq!(created["price"], 4.99);
    assert!(created["img"]
        .as_str()
        .unwrap()
        .starts_with("/storage/images/spanish-item-"));

    // The English sibling stays empty.
    let response = router.oneshot(get("/v1/items")).await.unwrap();
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 0);
}
