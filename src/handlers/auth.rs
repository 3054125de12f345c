use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Duration as CookieDuration;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{CSRF_COOKIE, CSRF_HEADER, REFRESH_COOKIE, REFRESH_TTL_DAYS};
use crate::config::VerificationMethod;
use crate::error::{AppError, AppResult};
use crate::models::AccountDto;
use crate::oauth::CallbackParams;
use crate::service::auth_service::AuthOutcome;
use crate::state::AppState;

fn random_state() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "https")
        .unwrap_or(false)
}

fn session_cookies(state: &AppState, secure: bool, refresh_token: &str, csrf_token: &str) -> (Cookie<'static>, Cookie<'static>) {
    let _ = state;
    let max_age = CookieDuration::days(REFRESH_TTL_DAYS);
    let refresh_cookie = Cookie::build((REFRESH_COOKIE, refresh_token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build();
    let csrf_cookie = Cookie::build((CSRF_COOKIE, csrf_token.to_string()))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build();
    (refresh_cookie, csrf_cookie)
}

fn clear_cookies(jar: CookieJar) -> CookieJar {
    let expired = CookieDuration::seconds(0);
    let refresh_cookie = Cookie::build((REFRESH_COOKIE, ""))
        .path("/")
        .max_age(expired)
        .build();
    let csrf_cookie = Cookie::build((CSRF_COOKIE, ""))
        .path("/")
        .max_age(expired)
        .build();
    jar.add(refresh_cookie).add(csrf_cookie)
}

/// Translates an [`AuthOutcome`] into the HTTP response shape shared by
/// register/login/verify-email/OAuth-callback (section 4.6, "session issue
/// side effects"): a bare PKCE code when the caller requested one, otherwise
/// a token pair plus the `refresh_token`/`insforge_csrf` cookies.
async fn respond_with_session(
    state: &AppState,
    headers: &HeaderMap,
    jar: CookieJar,
    outcome: AuthOutcome,
    code_challenge: Option<String>,
) -> AppResult<Response> {
    let (user, access_token, refresh_token) = match outcome {
        AuthOutcome::PendingVerification => {
            return Ok((
                StatusCode::OK,
                Json(json!({ "requireEmailVerification": true, "accessToken": null })),
            )
                .into_response());
        }
        AuthOutcome::Issued {
            user,
            access_token,
            refresh_token,
        } => (user, access_token, refresh_token),
    };

    if let Some(challenge) = code_challenge {
        let code = state.pkce.store(access_token, user.clone(), Some(challenge)).await;
        return Ok((StatusCode::OK, Json(json!({ "code": code, "user": user }))).into_response());
    }

    let csrf_token = state.csrf.derive(&refresh_token);
    let (refresh_cookie, csrf_cookie) = session_cookies(state, is_secure(headers), &refresh_token, &csrf_token);
    let jar = jar.add(refresh_cookie).add(csrf_cookie);

    Ok((
        jar,
        Json(json!({ "user": user, "accessToken": access_token, "csrfToken": csrf_token })),
    )
        .into_response())
}

// ============================================================================
// Register / login / exchange / refresh / logout
// ============================================================================

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub code_challenge: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Response> {
    body.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let outcome = state
        .auth_service
        .register(&body.email, &body.password, body.name)
        .await?;
    respond_with_session(&state, &headers, jar, outcome, body.code_challenge).await
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    pub password: String,
    pub code_challenge: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<Response> {
    body.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let outcome = state.auth_service.login(&body.email, &body.password).await?;
    respond_with_session(&state, &headers, jar, outcome, body.code_challenge).await
}

#[derive(Deserialize)]
pub struct ExchangeRequest {
    pub code: String,
    pub code_verifier: Option<String>,
}

/// Consumes a PKCE authorization code (one-shot) and mints a fresh refresh
/// token from the claims baked into the stored access token.
pub async fn exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<ExchangeRequest>,
) -> AppResult<Response> {
    let (access_token, user, code_challenge) = state
        .pkce
        .consume(&body.code)
        .await
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired code".into()))?;

    if let Some(challenge) = code_challenge {
        let verifier = body
            .code_verifier
            .ok_or_else(|| AppError::InvalidInput("code_verifier is required".into()))?;
        if !crate::auth::verify_pkce(&verifier, &challenge) {
            return Err(AppError::Unauthorized("PKCE verification failed".into()));
        }
    }

    let claims = state.tokens.verify_access(&access_token)?;
    let refresh_token = state
        .tokens
        .issue_refresh(claims.user_id()?, claims.email.clone(), claims.role)?;
    let csrf_token = state.csrf.derive(&refresh_token);
    let (refresh_cookie, csrf_cookie) = session_cookies(&state, is_secure(&headers), &refresh_token, &csrf_token);
    let jar = jar.add(refresh_cookie).add(csrf_cookie);

    Ok((
        jar,
        Json(json!({ "accessToken": access_token, "user": user, "csrfToken": csrf_token })),
    )
        .into_response())
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<Response> {
    let refresh_token = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    let csrf_cookie = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let csrf_header = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !state.csrf.verify(
        csrf_header.as_deref(),
        csrf_cookie.as_deref(),
        refresh_token.as_deref(),
    ) {
        return Ok((clear_cookies(jar), AppError::Forbidden("CSRF verification failed".into())).into_response());
    }

    let Ok(claims) = state.tokens.verify_refresh(refresh_token.as_deref().unwrap_or_default()) else {
        return Ok((clear_cookies(jar), AppError::Unauthorized("Invalid or expired refresh token".into())).into_response());
    };

    let user_id = claims.user_id()?;
    let new_access = state.tokens.issue_access(user_id, claims.email.clone(), claims.role)?;
    let new_refresh = state.tokens.issue_refresh(user_id, claims.email.clone(), claims.role)?;
    let new_csrf = state.csrf.derive(&new_refresh);
    let (refresh_cookie, csrf_cookie) = session_cookies(&state, is_secure(&headers), &new_refresh, &new_csrf);
    let jar = jar.add(refresh_cookie).add(csrf_cookie);

    Ok((jar, Json(json!({ "accessToken": new_access }))).into_response())
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (clear_cookies(jar), Json(json!({ "message": "Logged out" })))
}

// ============================================================================
// Email verification / password reset
// ============================================================================

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

pub async fn send_verification_email(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> AppResult<impl IntoResponse> {
    state.auth_service.send_verification_email(&body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "If your email is registered, a verification email has been sent." })),
    ))
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub email: Option<String>,
    pub otp: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<VerifyEmailRequest>,
) -> AppResult<Response> {
    let outcome = match state.config.email_verification_method {
        VerificationMethod::Code => {
            let email = body
                .email
                .ok_or_else(|| AppError::InvalidInput("email is required".into()))?;
            state.auth_service.verify_email_with_code(&email, &body.otp).await?
        }
        VerificationMethod::Link => state.auth_service.verify_email_with_token(&body.otp).await?,
    };
    respond_with_session(&state, &headers, jar, outcome, None).await
}

pub async fn send_reset_password_email(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> AppResult<impl IntoResponse> {
    state.auth_service.send_reset_password_email(&body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "If your email is registered, a password reset email has been sent." })),
    ))
}

#[derive(Deserialize)]
pub struct ExchangeResetTokenRequest {
    pub email: String,
    pub otp: String,
}

/// Verifies the reset code then re-issues it as a one-shot hash token, so the
/// client can separate "enter the code" from "set the new password" without
/// re-exposing the original code (section 4.4).
pub async fn exchange_reset_password_token(
    State(state): State<AppState>,
    Json(body): Json<ExchangeResetTokenRequest>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.pool.acquire().await.map_err(AppError::Database)?;
    let (token, _expires_at) = crate::auth::OtpService::exchange_code_for_token(
        &mut conn,
        &body.email,
        crate::auth::Purpose::ResetPassword,
        &body.otp,
    )
    .await?;
    Ok(Json(json!({ "token": token })))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(rename = "newPassword")]
    pub new_password: String,
    pub token: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .auth_service
        .reset_password_with_token(&body.new_password, &body.token)
        .await?;
    Ok(Json(json!({ "message": "Password reset successful" })))
}

// ============================================================================
// Admin sessions
// ============================================================================

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn admin_login(
    State(state): State<AppState>,
    Json(body): Json<AdminLoginRequest>,
) -> AppResult<impl IntoResponse> {
    let access_token = state.auth_service.admin_login(&body.email, &body.password)?;
    Ok(Json(json!({ "accessToken": access_token })))
}

#[derive(Deserialize)]
pub struct AdminExchangeRequest {
    pub token: String,
}

pub async fn admin_login_exchange(
    State(state): State<AppState>,
    Json(body): Json<AdminExchangeRequest>,
) -> AppResult<impl IntoResponse> {
    let access_token = state
        .auth_service
        .admin_login_with_authorization_code(&body.token)
        .await?;
    Ok(Json(json!({ "accessToken": access_token })))
}

// ============================================================================
// Session / config introspection
// ============================================================================

pub async fn current_session(user: crate::auth::AuthUser) -> impl IntoResponse {
    Json(json!({
        "userId": user.user_id(),
        "email": user.email(),
        "role": user.role(),
    }))
}

pub async fn public_config(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<&str> = state
        .config
        .oauth
        .iter()
        .filter(|(_, cfg)| cfg.client_id.is_some() || cfg.use_cloud_broker)
        .map(|(id, _)| id.as_str())
        .collect();

    Json(json!({
        "requireEmailVerification": state.config.require_email_verification,
        "emailVerificationMethod": match state.config.email_verification_method {
            VerificationMethod::Code => "code",
            VerificationMethod::Link => "link",
        },
        "oauthProviders": providers,
    }))
}

pub async fn get_config(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(json!({
        "requireEmailVerification": state.config.require_email_verification,
        "emailVerificationMethod": match state.config.email_verification_method {
            VerificationMethod::Code => "code",
            VerificationMethod::Link => "link",
        },
        "maxFileSize": state.config.max_file_size,
        "publicUrl": state.config.public_url,
    }))
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(rename = "requireEmailVerification")]
    pub require_email_verification: Option<bool>,
}

/// `Config` is loaded once from the environment at startup and shared behind
/// an `Arc` (section 2.3) — there is no live mutation path, so this endpoint
/// reports what's configured rather than changing it. Documented as an open
/// question resolution in the design notes.
pub async fn put_config(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
    Json(_body): Json<UpdateConfigRequest>,
) -> impl IntoResponse {
    Json(json!({
        "requireEmailVerification": state.config.require_email_verification,
        "message": "Configuration is environment-provisioned and read-only at runtime",
    }))
}

// ============================================================================
// User administration
// ============================================================================

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

pub async fn list_users(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<impl IntoResponse> {
    let users = state
        .auth_service
        .list_users(
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
            query.search.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "users": users })))
}

pub async fn get_user(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let account = sqlx::query_as::<_, crate::models::Account>("SELECT * FROM auth.accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(AccountDto::from(account)))
}

#[derive(Deserialize)]
pub struct DeleteUsersRequest {
    pub ids: Vec<Uuid>,
}

pub async fn delete_users(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
    Json(body): Json<DeleteUsersRequest>,
) -> AppResult<impl IntoResponse> {
    let deleted = state.auth_service.delete_users(&body.ids).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn issue_anon_token(
    _admin: crate::auth::AdminUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let access_token = state.tokens.issue_anon()?;
    Ok(Json(json!({ "accessToken": access_token })))
}

// ============================================================================
// OAuth authorize / callback
// ============================================================================

#[derive(Serialize)]
struct AuthorizeResponse {
    #[serde(rename = "authorizeUrl")]
    authorize_url: String,
}

pub async fn oauth_authorize_get(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Response> {
    let provider_handle = state.oauth.get(&provider)?;
    let oauth_state = random_state();
    let url = provider_handle.authorize_url(&oauth_state).await?;
    Ok(Redirect::to(&url).into_response())
}

pub async fn oauth_authorize_post(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<impl IntoResponse> {
    let provider_handle = state.oauth.get(&provider)?;
    let oauth_state = random_state();
    let url = provider_handle.authorize_url(&oauth_state).await?;
    Ok(Json(AuthorizeResponse { authorize_url: url }))
}

#[derive(Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub id_token: Option<String>,
    pub token: Option<String>,
    pub code_verifier: Option<String>,
}

async fn handle_oauth_callback(
    state: &AppState,
    headers: &HeaderMap,
    jar: CookieJar,
    provider: &str,
    params: OAuthCallbackParams,
) -> AppResult<Response> {
    let provider_handle = state.oauth.get(provider)?;
    let callback_params = CallbackParams {
        code: params.code,
        token: params.id_token.or(params.token),
        state: params.state,
        code_verifier: params.code_verifier,
    };
    let identity = provider_handle.callback(callback_params).await?;
    let outcome = state.auth_service.find_or_create_third_party_user(identity).await?;
    respond_with_session(state, headers, jar, outcome, None).await
}

pub async fn oauth_callback_get(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> AppResult<Response> {
    handle_oauth_callback(&state, &headers, jar, &provider, params).await
}

pub async fn oauth_callback_post(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    axum::Form(params): axum::Form<OAuthCallbackParams>,
) -> AppResult<Response> {
    handle_oauth_callback(&state, &headers, jar, &provider, params).await
}
