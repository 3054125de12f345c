use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const REFETCH_COOLDOWN: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Algorithms accepted for externally-signed cloud tokens (section 4.1):
/// RS* and ES* only — HS256 is reserved for locally-issued tokens, so a
/// cloud token can never be forged with the local HS256 secret.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

struct CacheEntry {
    fetched_at: Instant,
    keys: JwkSet,
}

/// Fetches and caches a remote JWKS document, verifying externally-issued
/// (cloud) tokens against it.
///
/// Cache policy (section 4.1 / section 5): keyed by `kid`, refreshed at most
/// once per 30s cooldown, and treated as stale after 10 minutes.
pub struct JwksVerifier {
    jwks_url: String,
    http: reqwest::Client,
    cache: Mutex<Option<CacheEntry>>,
    last_fetch_attempt: Mutex<Option<Instant>>,
}

#[derive(Debug)]
pub struct CloudClaims {
    pub project_id: Option<String>,
    pub claims: serde_json::Value,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(rename = "projectId")]
    project_id: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

impl JwksVerifier {
    pub fn new(cloud_api_host: &str) -> Self {
        Self {
            jwks_url: format!(
                "{}/.well-known/jwks.json",
                cloud_api_host.trim_end_matches('/')
            ),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("failed to build JWKS HTTP client"),
            cache: Mutex::new(None),
            last_fetch_attempt: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> AppResult<JwkSet> {
        let resp = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("JWKS fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "JWKS endpoint returned {}",
                resp.status()
            )));
        }

        resp.json::<JwkSet>()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("JWKS body invalid: {e}")))
    }

    /// Returns a cached JWKS document, refetching when stale and not within
    /// the cooldown window. Concurrent callers share one in-flight fetch via
    /// the cache mutex (held for the duration of the refetch).
    async fn keys(&self) -> AppResult<JwkSet> {
        let mut cache = self.cache.lock().await;
        let needs_refetch = match cache.as_ref() {
            Some(entry) => entry.fetched_at.elapsed() > CACHE_TTL,
            None => true,
        };

        if !needs_refetch {
            return Ok(cache.as_ref().unwrap().keys.clone());
        }

        let mut last_attempt = self.last_fetch_attempt.lock().await;
        let within_cooldown = last_attempt
            .map(|t| t.elapsed() < REFETCH_COOLDOWN)
            .unwrap_or(false);

        if within_cooldown {
            if let Some(entry) = cache.as_ref() {
                return Ok(entry.keys.clone());
            }
        }

        *last_attempt = Some(Instant::now());
        drop(last_attempt);

        let keys = self.fetch().await?;
        *cache = Some(CacheEntry {
            fetched_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }

    /// Verifies a cloud-issued JWT against the cached JWKS, enforcing the
    /// configured `project_id` equality when one is set (section 4.1, 6).
    pub async fn verify(&self, token: &str, expected_project_id: Option<&str>) -> AppResult<CloudClaims> {
        let header = decode_header(token)
            .map_err(|_| AppError::Unauthorized("Malformed token header".into()))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AppError::Unauthorized("Unsupported algorithm".into()));
        }

        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthorized("Token missing kid".into()))?;

        let jwks = self.keys().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AppError::Unauthorized("Unknown signing key".into()))?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|_| AppError::Unauthorized("Invalid JWK".into()))?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &decoding_key, &validation)
            .map_err(|_| AppError::Unauthorized("Signature verification failed".into()))?;

        if let (Some(expected), Some(actual)) = (expected_project_id, data.claims.project_id.as_deref()) {
            if expected != actual {
                return Err(AppError::Forbidden("Project ID mismatch".into()));
            }
        }

        Ok(CloudClaims {
            project_id: data.claims.project_id,
            claims: data.claims.rest,
        })
    }
}
