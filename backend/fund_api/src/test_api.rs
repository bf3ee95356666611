use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt;

use crate::allocation::Allocator;
use crate::api::{router, ApiState};
use crate::db;

async fn app() -> Router {
    app_with_pool().await.0
}

async fn app_with_pool() -> (Router, SqlitePool) {
    let pool = db::init_pool("sqlite::memory:", 1).await.unwrap();
    let app = router(Arc::new(ApiState {
        allocator: Allocator::new(pool.clone(), 3),
        title: "QRKot".to_string(),
    }));
    (app, pool)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn project_body(name: &str, amount: i64) -> Value {
    json!({ "name": name, "description": "Help the shelter", "full_amount": amount })
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["title"], "QRKot");
}

#[tokio::test]
async fn test_donation_then_project_round() {
    let app = app().await;

    let (status, donation) = call(
        &app,
        Method::POST,
        "/donation/",
        Some(json!({ "full_amount": 300, "comment": "for the cats" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(donation["invested_amount"], 0);
    assert_eq!(donation["fully_invested"], false);
    assert!(donation.get("close_date").is_none());

    let (status, project) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Food", 200)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["invested_amount"], 200);
    assert_eq!(project["fully_invested"], true);
    assert!(project["close_date"].is_string());

    let (_, projects) = call(&app, Method::GET, "/charity_project/", None).await;
    assert_eq!(projects[0], project);

    let (_, donations) = call(&app, Method::GET, "/donation/", None).await;
    assert_eq!(donations[0]["invested_amount"], 200);
    assert_eq!(donations[0]["fully_invested"], false);

    let (status, ledger) = call(&app, Method::GET, "/allocations", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ledger["count"], 1);
    assert_eq!(ledger["allocations"][0]["source_kind"], "charity_project");
    assert_eq!(ledger["allocations"][0]["sink_kind"], "donation");
    assert_eq!(ledger["allocations"][0]["amount"], 200);

    let uri = format!("/charity_project/{}/allocations", project["id"]);
    let (status, mine) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["count"], 1);
}

#[tokio::test]
async fn test_create_validation() {
    let app = app().await;

    let (status, _) = call(&app, Method::POST, "/donation/", Some(json!({ "full_amount": 0 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = call(
        &app,
        Method::POST,
        "/donation/",
        Some(json!({ "full_amount": 5, "invested_amount": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("invested_amount"));

    let (status, body) = call(
        &app,
        Method::POST,
        "/donation/",
        Some(json!({ "full_amount": "lots" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    let (status, _) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("", 10)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Dup", 10)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Dup", 10)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn test_patch_rules() {
    let app = app().await;
    let (_, project) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Roof", 100)),
    )
    .await;
    let uri = format!("/charity_project/{}", project["id"]);
    call(&app, Method::POST, "/donation/", Some(json!({ "full_amount": 40 }))).await;

    let (status, _) = call(&app, Method::PATCH, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, Method::PATCH, &uri, Some(json!({ "full_amount": 39 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, patched) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({ "description": "Roof and walls" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["description"], "Roof and walls");
    assert_eq!(patched["invested_amount"], 40);

    // Dropping the target to what was raised closes the project.
    let (status, closed) = call(&app, Method::PATCH, &uri, Some(json!({ "full_amount": 40 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["fully_invested"], true);
    assert!(closed["close_date"].is_string());
    let (_, projects) = call(&app, Method::GET, "/charity_project/", None).await;
    assert_eq!(projects[0]["close_date"], closed["close_date"]);

    let (status, _) = call(&app, Method::PATCH, &uri, Some(json!({ "name": "New" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::PATCH,
        "/charity_project/999",
        Some(json!({ "name": "Ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_only_unfunded() {
    let app = app().await;
    let (_, empty) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Empty", 10)),
    )
    .await;
    let uri = format!("/charity_project/{}", empty["id"]);

    let (status, deleted) = call(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["name"], "Empty");
    let (status, _) = call(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, funded) = call(
        &app,
        Method::POST,
        "/charity_project/",
        Some(project_body("Funded", 10)),
    )
    .await;
    call(&app, Method::POST, "/donation/", Some(json!({ "full_amount": 3 }))).await;
    let uri = format!("/charity_project/{}", funded["id"]);
    let (status, _) = call(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, projects) = call(&app, Method::GET, "/charity_project/", None).await;
    assert_eq!(projects.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_allocation_leaves_no_donation_behind() {
    let (app, pool) = app_with_pool().await;
    call(&app, Method::POST, "/charity_project/", Some(project_body("A", 3))).await;
    let (_, b) = call(&app, Method::POST, "/charity_project/", Some(project_body("B", 5))).await;

    let trigger = format!(
        "CREATE TRIGGER block_b BEFORE UPDATE ON charity_project WHEN OLD.id = {}
         BEGIN SELECT RAISE(ABORT, 'project row is locked'); END",
        b["id"]
    );
    sqlx::query(&trigger).execute(&pool).await.unwrap();

    let (status, body) = call(&app, Method::POST, "/donation/", Some(json!({ "full_amount": 7 }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("retry"));
    let (_, donations) = call(&app, Method::GET, "/donation/", None).await;
    assert_eq!(donations, json!([]));

    sqlx::query("DROP TRIGGER block_b").execute(&pool).await.unwrap();
    let (status, donation) = call(&app, Method::POST, "/donation/", Some(json!({ "full_amount": 7 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(donation["fully_invested"], true);

    let (_, donations) = call(&app, Method::GET, "/donation/", None).await;
    assert_eq!(donations.as_array().unwrap().len(), 1);
    let (_, projects) = call(&app, Method::GET, "/charity_project/", None).await;
    assert_eq!(projects[0]["fully_invested"], true);
    assert_eq!(projects[1]["invested_amount"], 4);
}
