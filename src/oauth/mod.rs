pub mod apple;
pub mod standard;
pub mod x;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Every provider's callback normalises to this shape (section 4.5).
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub user_name: Option<String>,
    pub avatar_url: Option<String>,
    pub identity_data: serde_json::Value,
}

/// Whatever the callback endpoint received, passed through uninterpreted —
/// individual providers decide which fields they need.
#[derive(Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub token: Option<String>,
    pub state: Option<String>,
    pub code_verifier: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Builds the provider's authorize URL, optionally storing a PKCE
    /// verifier keyed by `state` for providers that support or require it.
    async fn authorize_url(&self, state: &str) -> AppResult<String>;

    /// Exchanges the callback payload (code, or Apple's id_token) for a
    /// normalised [`Identity`], or delegates to the cloud broker path when
    /// the payload already carries a signed broker token.
    async fn callback(&self, params: CallbackParams) -> AppResult<Identity>;
}

const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Short-lived `state -> code_verifier` map shared by every PKCE-capable
/// provider (section 9: "PKCE store and OAuth-verifier map — guarded by a
/// per-component mutex").
#[derive(Clone, Default)]
pub struct OAuthVerifierStore {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl OAuthVerifierStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, state: String, verifier: String) {
        let mut guard = self.entries.write().await;
        let now = Instant::now();
        guard.retain(|_, (_, expires)| *expires > now);
        guard.insert(state, (verifier, now + OAUTH_STATE_TTL));
    }

    pub async fn take(&self, state: &str) -> Option<String> {
        let mut guard = self.entries.write().await;
        let (verifier, expires_at) = guard.remove(state)?;
        if expires_at < Instant::now() {
            return None;
        }
        Some(verifier)
    }
}

/// The registry the auth service consults by provider name.
#[derive(Clone, Default)]
pub struct OAuthRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl OAuthRegistry {
    pub fn from_config(config: &Config, verifiers: OAuthVerifierStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build OAuth HTTP client");

        let mut providers: HashMap<String, Arc<dyn OAuthProvider>> = HashMap::new();

        for spec in standard::STANDARD_PROVIDERS {
            if let Some(cfg) = config.oauth.get(spec.id) {
                providers.insert(
                    spec.id.to_string(),
                    Arc::new(standard::StandardProvider::new(
                        spec,
                        cfg.clone(),
                        http.clone(),
                        &config.public_url,
                        verifiers.clone(),
                    )),
                );
            }
        }

        if let Some(cfg) = config.oauth.get("x") {
            providers.insert(
                "x".to_string(),
                Arc::new(x::XProvider::new(cfg.clone(), http.clone(), verifiers.clone())),
            );
        }

        if let Some(cfg) = config.oauth.get("apple") {
            providers.insert(
                "apple".to_string(),
                Arc::new(apple::AppleProvider::new(cfg.clone(), http.clone())),
            );
        }

        Self { providers }
    }

    pub fn get(&self, provider: &str) -> AppResult<Arc<dyn OAuthProvider>> {
        self.providers
            .get(provider)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown OAuth provider: {provider}")))
    }
}

/// Synthesises a placeholder email for providers that cannot supply a real
/// one, in the `{handle}@users.noreply.{provider}.local` shape (section 4.5).
pub fn synthesize_email(provider: &str, handle: &str) -> String {
    format!("{handle}@users.noreply.{provider}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifier_store_round_trips_once() {
        let store = OAuthVerifierStore::new();
        store.store("state-1".into(), "verifier-1".into()).await;
        assert_eq!(store.take("state-1").await, Some("verifier-1".into()));
        assert_eq!(store.take("state-1").await, None);
    }

    #[test]
    fn synthesize_email_matches_expected_shape() {
        assert_eq!(
            synthesize_email("github", "octocat"),
            "octocat@users.noreply.github.local"
        );
    }
}
