mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{create_test_app, post_json, post_json_authed, test_pool, TEST_ADMIN_EMAIL, TEST_ADMIN_PASSWORD};

async fn admin_token(pool: sqlx::PgPool) -> String {
    let app = create_test_app(pool);
    let resp = post_json(
        app,
        "/auth/admin/sessions",
        json!({ "email": TEST_ADMIN_EMAIL, "password": TEST_ADMIN_PASSWORD }),
    )
    .await;
    resp.body["accessToken"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn run_query_rejects_auth_schema_drop() {
    let pool = test_pool().await;
    let token = admin_token(pool.clone()).await;

    let app = create_test_app(pool);
    let resp = post_json_authed(
        app,
        "/database/query",
        &token,
        json!({ "sql": "DROP TABLE auth.accounts" }),
    )
    .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN, "body: {}", resp.body);
}

#[tokio::test]
async fn run_query_requires_admin_role() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/database/query",
        json!({ "sql": "SELECT 1" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "body: {}", resp.body);
}

#[tokio::test]
async fn run_query_executes_and_reports_change_set() {
    let pool = test_pool().await;
    let token = admin_token(pool.clone()).await;

    let app = create_test_app(pool.clone());
    // A scratch table private to this test run, dropped at the end so
    // concurrent test invocations never collide on its name.
    let table = format!("scratch_{}", uuid::Uuid::new_v4().simple());
    let resp = post_json_authed(
        app,
        "/database/query",
        &token,
        json!({ "sql": format!("CREATE TABLE {table} (id INT)") }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    let changes = resp.body["changes"].as_array().unwrap();
    assert!(changes.iter().any(|c| c["tag"] == "tables"));

    let app = create_test_app(pool);
    let resp = post_json_authed(
        app,
        "/database/query",
        &token,
        json!({ "sql": format!("DROP TABLE {table}") }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
}
