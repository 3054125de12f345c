use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::OAuthProviderConfig;
use crate::error::{AppError, AppResult};
use crate::oauth::{CallbackParams, Identity, OAuthProvider};

const APPLE_ISSUER: &str = "https://appleid.apple.com";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
const CLIENT_SECRET_TTL_DAYS: i64 = 180; // "≤ 6 months" per section 4.5
const JWKS_CACHE_TTL: StdDuration = StdDuration::from_secs(10 * 60);

#[derive(Serialize)]
struct ClientSecretClaims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
    sub: String,
}

#[derive(Deserialize)]
struct AppleIdTokenClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    is_private_email: Option<bool>,
}

#[derive(Deserialize)]
struct AppleTokenResponse {
    id_token: String,
}

struct JwksCache {
    fetched_at: Instant,
    keys: JwkSet,
}

/// Apple's id_token is always present on the callback (`response_mode=
/// form_post`), so the identity is normally read straight off it. A `code`
/// is also accepted so the server can exchange it for a fresh id_token when
/// the caller only has the authorization code.
pub struct AppleProvider {
    client_id: String,
    team_id: String,
    key_id: String,
    private_key_pem: String,
    redirect_uri: String,
    http: reqwest::Client,
    jwks_cache: Mutex<Option<JwksCache>>,
}

impl AppleProvider {
    pub fn new(config: OAuthProviderConfig, http: reqwest::Client) -> Self {
        Self {
            client_id: config.client_id.unwrap_or_default(),
            team_id: config.team_id.unwrap_or_default(),
            key_id: config.key_id.unwrap_or_default(),
            private_key_pem: config.private_key_pem.unwrap_or_default(),
            redirect_uri: config
                .redirect_uri
                .unwrap_or_else(|| "http://localhost:8080/auth/oauth/apple/callback".to_string()),
            http,
            jwks_cache: Mutex::new(None),
        }
    }

    /// Signs a fresh ES256 client-secret JWT per request (section 4.5):
    /// `iss=teamId`, `sub=clientId`, `aud=https://appleid.apple.com`.
    fn sign_client_secret(&self) -> AppResult<String> {
        let now = Utc::now();
        let claims = ClientSecretClaims {
            iss: self.team_id.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::days(CLIENT_SECRET_TTL_DAYS)).timestamp(),
            aud: APPLE_ISSUER.to_string(),
            sub: self.client_id.clone(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        let key = EncodingKey::from_ec_pem(self.private_key_pem.as_bytes())
            .map_err(|_| AppError::Internal)?;

        encode(&header, &claims, &key).map_err(|_| AppError::Internal)
    }

    async fn exchange_code_for_id_token(&self, code: &str) -> AppResult<String> {
        let client_secret = self.sign_client_secret()?;

        let resp = self
            .http
            .post(APPLE_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Unauthorized(format!("apple token exchange failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Unauthorized(format!(
                "apple token endpoint returned {}",
                resp.status()
            )));
        }

        let body: AppleTokenResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Unauthorized(format!("apple token body invalid: {e}")))?;

        Ok(body.id_token)
    }

    async fn jwks(&self) -> AppResult<JwkSet> {
        let mut cache = self.jwks_cache.lock().await;
        if let Some(entry) = cache.as_ref() {
            if entry.fetched_at.elapsed() < JWKS_CACHE_TTL {
                return Ok(entry.keys.clone());
            }
        }

        let resp = self
            .http
            .get(APPLE_JWKS_URL)
            .send()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("apple JWKS fetch failed: {e}")))?;

        let keys: JwkSet = resp
            .json()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("apple JWKS body invalid: {e}")))?;

        *cache = Some(JwksCache {
            fetched_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }

    async fn verify_id_token(&self, id_token: &str) -> AppResult<AppleIdTokenClaims> {
        let header = decode_header(id_token)
            .map_err(|_| AppError::Unauthorized("Malformed Apple id_token".into()))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthorized("Apple id_token missing kid".into()))?;

        let jwks = self.jwks().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AppError::Unauthorized("Unknown Apple signing key".into()))?;

        let decoding_key =
            DecodingKey::from_jwk(jwk).map_err(|_| AppError::Unauthorized("Invalid Apple JWK".into()))?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&[self.client_id.clone()]);
        validation.set_issuer(&[APPLE_ISSUER]);

        decode::<AppleIdTokenClaims>(id_token, &decoding_key, &validation)
            .map(|d| d.claims)
            .map_err(|_| AppError::Unauthorized("Apple id_token verification failed".into()))
    }
}

#[async_trait]
impl OAuthProvider for AppleProvider {
    fn id(&self) -> &'static str {
        "apple"
    }

    async fn authorize_url(&self, state: &str) -> AppResult<String> {
        Ok(format!(
            "{APPLE_ISSUER}/auth/authorize?client_id={}&redirect_uri={}&response_type=code&response_mode=form_post&scope=name%20email&state={state}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
        ))
    }

    async fn callback(&self, params: CallbackParams) -> AppResult<Identity> {
        let id_token = match params.token {
            Some(token) => token,
            None => {
                let code = params
                    .code
                    .ok_or_else(|| AppError::InvalidInput("Missing code or id_token".into()))?;
                self.exchange_code_for_id_token(&code).await?
            }
        };

        let claims = self.verify_id_token(&id_token).await?;
        let email = claims.email.unwrap_or_default();

        Ok(Identity {
            provider: "apple".to_string(),
            provider_id: claims.sub,
            email,
            user_name: None,
            avatar_url: None,
            identity_data: serde_json::json!({ "is_private_email": claims.is_private_email }),
        })
    }
}
