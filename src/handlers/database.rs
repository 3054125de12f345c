use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AdminUser;
use crate::error::AppResult;
use crate::sql_gate::{analyze_query, check_auth_schema_operations, split_statements};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

/// Admin-only raw SQL execution, gated by the SQL safety classifier (C8):
/// every statement is checked against the `auth` schema denylist before any
/// of them run, and the dashboard uses the returned change set to know which
/// caches to invalidate.
pub async fn run_query(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(body): Json<QueryRequest>,
) -> AppResult<impl axum::response::IntoResponse> {
    check_auth_schema_operations(&body.sql)?;

    let statements = split_statements(&body.sql);
    let mut tx = state.pool.begin().await?;
    for statement in &statements {
        if statement.trim().is_empty() {
            continue;
        }
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    let changes = analyze_query(&body.sql);
    Ok(Json(json!({ "changes": changes })))
}
