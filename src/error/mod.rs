use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Taxonomy from spec section 7. Every handler error ultimately collapses
/// into one of these; the HTTP status is derived once, here.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    AlreadyExists(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error")]
    Internal,
}

/// Maps sqlx errors to AppError, with special handling for unique-constraint
/// violations (PG error code 23505) so they surface as 409 rather than 500.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some(c) if c.contains("email") => "Email already registered",
                    Some(c) if c.contains("provider") => "Identity already linked",
                    _ => "Resource already exists",
                };
                return AppError::AlreadyExists(message.into());
            }
        }
        AppError::Database(e)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        tracing::warn!(error = ?e, "JWT operation failed");
        AppError::Unauthorized("Invalid or expired token".into())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, tag, message): (StatusCode, &str, String) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "InvalidInput", msg.clone()),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized", msg.clone())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFound", msg.clone()),
            AppError::AlreadyExists(msg) => (StatusCode::CONFLICT, "AlreadyExists", msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimited",
                "Too many requests".into(),
            ),
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PayloadTooLarge",
                "Payload too large".into(),
            ),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable", msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "Database error".into(),
                )
            }
            AppError::Internal => {
                tracing::error!("Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "Internal server error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": tag,
                "message": message,
                "statusCode": status.as_u16(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = AppError::Unauthorized("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn already_exists_returns_409() {
        let response = AppError::AlreadyExists("dup".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rate_limited_returns_429() {
        let response = AppError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn payload_too_large_returns_413() {
        let response = AppError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn service_unavailable_returns_503() {
        let response = AppError::ServiceUnavailable("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn error_body_has_tag_message_and_status_code() {
        let response = AppError::Forbidden("csrf mismatch".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "Forbidden");
        assert_eq!(json["message"], "csrf mismatch");
        assert_eq!(json["statusCode"], 403);
    }

    #[tokio::test]
    async fn unique_violation_maps_to_already_exists() {
        let db_err = sqlx::Error::RowNotFound;
        // RowNotFound isn't a constraint violation, so it must fall through
        // to the generic Database/Internal path rather than AlreadyExists.
        let app_err: AppError = db_err.into();
        let response = app_err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
