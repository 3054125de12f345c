use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use serde_json::json;
use uuid::Uuid;

use crate::auth::token::{Claims, Role};
use crate::state::AppState;

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

/// Authenticated (or anonymous) caller extracted from a valid `Authorization:
/// Bearer` access token. Fields are private: the only way to get an
/// `AuthUser` is through the extractor, so a handler can never forge one via
/// a struct literal (section 4.1).
pub struct AuthUser {
    user_id: Uuid,
    email: Option<String>,
    role: Role,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn from_claims(claims: Claims) -> Result<Self, AuthRejection> {
        let user_id = claims
            .user_id()
            .map_err(|_| auth_error("Invalid token subject"))?;
        Ok(AuthUser {
            user_id,
            email: claims.email,
            role: claims.role,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("Missing or invalid Authorization header"))?;

        let claims = state
            .tokens
            .verify_access(bearer.token())
            .map_err(|_| auth_error("Invalid or expired token"))?;

        AuthUser::from_claims(claims)
    }
}

/// Like [`AuthUser`] but rejects anything other than `project_admin` (section
/// 3). Used on endpoints that manage other accounts or project configuration.
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::ProjectAdmin {
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Admin role required" })),
            ));
        }
        Ok(AdminUser(user))
    }
}
