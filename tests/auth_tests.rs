mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{
    cookie_header, cookie_value, create_test_app, create_test_app_with_config, get_authed,
    get_no_auth, post_json, post_json_authed, post_json_with_cookie,
    post_json_with_cookie_and_header, test_config, test_pool, unique_email, TEST_ADMIN_EMAIL,
    TEST_ADMIN_PASSWORD,
};

// ============================================================================
// register / login — password flow without PKCE (spec §8 scenario 1)
// ============================================================================

#[tokio::test]
async fn register_success_issues_tokens_and_cookies() {
    let pool = test_pool().await;
    let app = create_test_app(pool);
    let email = unique_email();

    let resp = post_json(
        app,
        "/auth/users",
        json!({ "email": email, "password": "Abcdef1!", "name": "A" }),
    )
    .await;

    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
    assert!(resp.body["csrfToken"].is_string());
    assert_eq!(resp.body["user"]["email"], email.as_str());

    assert!(cookie_value(&resp.cookies, "refresh_token").is_some());
    assert!(cookie_value(&resp.cookies, "insforge_csrf").is_some());
    // The refresh cookie must carry HttpOnly; the CSRF cookie must not, so
    // browser JS can read and echo it (section 6).
    let refresh_set_cookie = resp
        .cookies
        .iter()
        .find(|c| c.starts_with("refresh_token="))
        .unwrap();
    assert!(refresh_set_cookie.to_lowercase().contains("httponly"));
    let csrf_set_cookie = resp
        .cookies
        .iter()
        .find(|c| c.starts_with("insforge_csrf="))
        .unwrap();
    assert!(!csrf_set_cookie.to_lowercase().contains("httponly"));
}

#[tokio::test]
async fn register_duplicate_email_returns_409() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    assert_eq!(resp.status, StatusCode::OK);

    let app = create_test_app(pool);
    let resp = common::register_user(app, &email, "AnotherPass1!").await;
    assert_eq!(resp.status, StatusCode::CONFLICT, "body: {}", resp.body);
}

#[tokio::test]
async fn register_weak_password_rejected_on_every_rule() {
    let pool = test_pool().await;
    let app = create_test_app(pool);
    let email = unique_email();

    // All-lowercase, no digit, no special character, under minimum length
    // requirements — should fail the password policy entirely.
    let resp = post_json(
        app,
        "/auth/users",
        json!({ "email": email, "password": "weak" }),
    )
    .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST, "body: {}", resp.body);
}

#[tokio::test]
async fn login_success_round_trips_registered_user() {
    let pool = test_pool().await;
    let email = unique_email();
    let password = "Abcdef1!";

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, password).await;
    assert_eq!(resp.status, StatusCode::OK);

    let app = create_test_app(pool);
    let resp = post_json(
        app,
        "/auth/sessions",
        json!({ "email": email, "password": password }),
    )
    .await;

    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
    assert_eq!(resp.body["user"]["email"], email.as_str());
}

#[tokio::test]
async fn login_wrong_password_returns_401() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    assert_eq!(resp.status, StatusCode::OK);

    let app = create_test_app(pool);
    let resp = post_json(
        app,
        "/auth/sessions",
        json!({ "email": email, "password": "WrongPass1!" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "body: {}", resp.body);
}

#[tokio::test]
async fn login_unknown_email_returns_401_not_404() {
    // User-enumeration prevention: unknown accounts fail the same way as
    // wrong passwords, never a distinguishing 404 (section 7).
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/auth/sessions",
        json!({ "email": "nobody-at-all@example.com", "password": "Abcdef1!" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn access_token_from_login_is_accepted_by_protected_endpoint() {
    let pool = test_pool().await;
    let email = unique_email();
    let password = "Abcdef1!";

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, password).await;
    let access_token = resp.body["accessToken"].as_str().unwrap().to_owned();

    let app = create_test_app(pool);
    let resp = get_authed(app, "/auth/sessions/current", &access_token).await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert_eq!(resp.body["email"], email.as_str());
}

// ============================================================================
// PKCE signup + exchange (spec §8 scenario 2)
// ============================================================================

#[tokio::test]
async fn register_with_pkce_returns_code_not_tokens() {
    let pool = test_pool().await;
    let app = create_test_app(pool);
    let email = unique_email();

    let resp = post_json(
        app,
        "/auth/users",
        json!({
            "email": email,
            "password": "Abcdef1!",
            "code_challenge": "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        }),
    )
    .await;

    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["code"].is_string());
    assert!(resp.body["accessToken"].is_null());
    // No session cookies are set on the PKCE branch — only `/exchange` does.
    assert!(cookie_value(&resp.cookies, "refresh_token").is_none());
}

#[tokio::test]
async fn pkce_exchange_succeeds_once_then_fails() {
    let pool = test_pool().await;
    let email = unique_email();

    // verifier -> challenge = base64url(sha256(verifier))
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        use sha2::{Digest, Sha256};
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    };

    let app = create_test_app(pool.clone());
    let resp = post_json(
        app,
        "/auth/users",
        json!({ "email": email, "password": "Abcdef1!", "code_challenge": challenge }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let code = resp.body["code"].as_str().unwrap().to_owned();

    let app = create_test_app(pool.clone());
    let resp = post_json(
        app,
        "/auth/exchange",
        json!({ "code": code, "code_verifier": verifier }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
    assert!(cookie_value(&resp.cookies, "refresh_token").is_some());

    // Second exchange of the same code must fail — one-shot (section 8 invariant 3).
    let app = create_test_app(pool);
    let resp = post_json(
        app,
        "/auth/exchange",
        json!({ "code": code, "code_verifier": verifier }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "body: {}", resp.body);
}

#[tokio::test]
async fn pkce_exchange_rejects_wrong_verifier() {
    let pool = test_pool().await;
    let email = unique_email();
    let challenge = {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        use sha2::{Digest, Sha256};
        URL_SAFE_NO_PAD.encode(Sha256::digest(b"correct-verifier"))
    };

    let app = create_test_app(pool.clone());
    let resp = post_json(
        app,
        "/auth/users",
        json!({ "email": email, "password": "Abcdef1!", "code_challenge": challenge }),
    )
    .await;
    let code = resp.body["code"].as_str().unwrap().to_owned();

    let app = create_test_app(pool);
    let resp = post_json(
        app,
        "/auth/exchange",
        json!({ "code": code, "code_verifier": "wrong-verifier" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "body: {}", resp.body);
}

// ============================================================================
// refresh rotation + CSRF double-submit (spec §8 scenario 4)
// ============================================================================

#[tokio::test]
async fn refresh_without_csrf_header_is_forbidden() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    let cookies = cookie_header(&resp.cookies, &["refresh_token", "insforge_csrf"]);

    let app = create_test_app(pool);
    let resp = post_json_with_cookie(app, "/auth/refresh", &cookies, json!({})).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN, "body: {}", resp.body);
}

#[tokio::test]
async fn refresh_with_matching_csrf_header_rotates_both_cookies() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    let old_refresh = cookie_value(&resp.cookies, "refresh_token").unwrap().to_owned();
    let old_csrf = cookie_value(&resp.cookies, "insforge_csrf").unwrap().to_owned();
    let cookies = cookie_header(&resp.cookies, &["refresh_token", "insforge_csrf"]);

    let app = create_test_app(pool.clone());
    let resp = post_json_with_cookie_and_header(
        app,
        "/auth/refresh",
        &cookies,
        ("x-csrf-token", &old_csrf),
        json!({}),
    )
    .await;

    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
    let new_refresh = cookie_value(&resp.cookies, "refresh_token").unwrap();
    let new_csrf = cookie_value(&resp.cookies, "insforge_csrf").unwrap();
    assert_ne!(new_refresh, old_refresh);
    assert_ne!(new_csrf, old_csrf);

    // The prior CSRF token must no longer be accepted (section 8 invariant 4).
    let app = create_test_app(pool);
    let resp = post_json_with_cookie_and_header(
        app,
        "/auth/refresh",
        &cookies,
        ("x-csrf-token", &old_csrf),
        json!({}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN, "body: {}", resp.body);
}

#[tokio::test]
async fn refresh_with_mismatched_csrf_clears_cookies() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    let cookies = cookie_header(&resp.cookies, &["refresh_token", "insforge_csrf"]);

    let app = create_test_app(pool);
    let resp = post_json_with_cookie_and_header(
        app,
        "/auth/refresh",
        &cookies,
        ("x-csrf-token", "not-the-right-token"),
        json!({}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    // Clearing is signaled by an immediately-expired Set-Cookie for both names.
    assert!(resp.cookies.iter().any(|c| c.starts_with("refresh_token=")));
    assert!(resp.cookies.iter().any(|c| c.starts_with("insforge_csrf=")));
}

#[tokio::test]
async fn logout_clears_cookies() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(app, "/auth/logout", json!({})).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.cookies.iter().any(|c| c.starts_with("refresh_token=")));
}

// ============================================================================
// email verification (code path) and password reset
// ============================================================================

#[tokio::test]
async fn registration_with_required_verification_withholds_token_until_verified() {
    let pool = test_pool().await;
    let mut config = test_config();
    config.require_email_verification = true;
    let email = unique_email();

    let app = create_test_app_with_config(pool.clone(), config.clone());
    let resp = post_json(
        app,
        "/auth/users",
        json!({ "email": email, "password": "Abcdef1!" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert_eq!(resp.body["requireEmailVerification"], true);
    assert!(resp.body["accessToken"].is_null());

    // Login before verifying must be forbidden, not merely unauthorized.
    let app = create_test_app_with_config(pool, config);
    let resp = post_json(
        app,
        "/auth/sessions",
        json!({ "email": email, "password": "Abcdef1!" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN, "body: {}", resp.body);
}

#[tokio::test]
async fn send_verification_email_is_202_even_for_unknown_address() {
    // User-enumeration prevention (section 7): identical response whether or
    // not the account exists.
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/auth/email/send-verification",
        json!({ "email": "definitely-not-registered@example.com" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn send_reset_password_email_is_202_even_for_unknown_address() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/auth/email/send-reset-password",
        json!({ "email": "definitely-not-registered@example.com" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::ACCEPTED);
}

// ============================================================================
// admin sessions
// ============================================================================

#[tokio::test]
async fn admin_login_succeeds_with_configured_credentials() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/auth/admin/sessions",
        json!({ "email": TEST_ADMIN_EMAIL, "password": TEST_ADMIN_PASSWORD }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
}

#[tokio::test]
async fn admin_login_rejects_wrong_credentials() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(
        app,
        "/auth/admin/sessions",
        json!({ "email": TEST_ADMIN_EMAIL, "password": "not-the-password" }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_token_can_list_and_delete_users() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    common::register_user(app, &email, "Abcdef1!").await;

    let app = create_test_app(pool.clone());
    let resp = post_json(
        app,
        "/auth/admin/sessions",
        json!({ "email": TEST_ADMIN_EMAIL, "password": TEST_ADMIN_PASSWORD }),
    )
    .await;
    let admin_token = resp.body["accessToken"].as_str().unwrap().to_owned();

    let app = create_test_app(pool.clone());
    let resp = get_authed(
        app,
        &format!("/auth/users?search={email}"),
        &admin_token,
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    let users = resp.body["users"].as_array().unwrap();
    assert!(users.iter().any(|u| u["email"] == email.as_str()));

    let user_id = users
        .iter()
        .find(|u| u["email"] == email.as_str())
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let app = create_test_app(pool);
    let resp = common::delete_json_authed(
        app,
        "/auth/users",
        &admin_token,
        json!({ "ids": [user_id] }),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert_eq!(resp.body["deleted"], 1);
}

#[tokio::test]
async fn non_admin_token_cannot_list_users() {
    let pool = test_pool().await;
    let email = unique_email();

    let app = create_test_app(pool.clone());
    let resp = common::register_user(app, &email, "Abcdef1!").await;
    let access_token = resp.body["accessToken"].as_str().unwrap().to_owned();

    let app = create_test_app(pool);
    let resp = get_authed(app, "/auth/users", &access_token).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN, "body: {}", resp.body);
}

#[tokio::test]
async fn anon_token_endpoint_requires_admin() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let resp = post_json(app, "/auth/tokens/anon", json!({})).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "body: {}", resp.body);
}

#[tokio::test]
async fn admin_can_issue_anon_token() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let resp = post_json(
        app,
        "/auth/admin/sessions",
        json!({ "email": TEST_ADMIN_EMAIL, "password": TEST_ADMIN_PASSWORD }),
    )
    .await;
    let admin_token = resp.body["accessToken"].as_str().unwrap().to_owned();

    let app = create_test_app(pool);
    let resp = post_json_authed(app, "/auth/tokens/anon", &admin_token, json!({})).await;
    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert!(resp.body["accessToken"].is_string());
}

// ============================================================================
// public config / health
// ============================================================================

#[tokio::test]
async fn health_check_reports_ok_with_live_database() {
    let pool = test_pool().await;
    let app = create_test_app(pool);
    let resp = get_no_auth(app, "/health").await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn public_config_exposes_verification_method_without_auth() {
    let pool = test_pool().await;
    let app = create_test_app(pool);
    let resp = get_no_auth(app, "/auth/public-config").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["emailVerificationMethod"], "code");
}
