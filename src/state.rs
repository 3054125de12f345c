use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::{CsrfManager, JwksVerifier, PkceStore, TokenService};
use crate::config::Config;
use crate::oauth::{OAuthRegistry, OAuthVerifierStore};
use crate::postgrest::PostgrestProxy;
use crate::realtime::Hub;
use crate::service::auth_service::AuthService;

/// Shared application state passed to every handler and extractor.
///
/// Every field here is itself cheap to clone (`Arc`-backed or a plain
/// handle), so cloning `AppState` per request costs next to nothing.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub csrf: CsrfManager,
    pub pkce: PkceStore,
    pub oauth: OAuthRegistry,
    pub oauth_verifiers: OAuthVerifierStore,
    pub auth_service: Arc<AuthService>,
    pub postgrest: Arc<PostgrestProxy>,
    pub hub: Hub,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> AppResultState {
        let config = Arc::new(config);
        let tokens = TokenService::new(&config.jwt_secret)?;
        let csrf = CsrfManager::new(&config.jwt_secret);
        let pkce = PkceStore::new();
        let oauth_verifiers = OAuthVerifierStore::new();
        let oauth = OAuthRegistry::from_config(&config, oauth_verifiers.clone());

        let jwks = config
            .cloud_api_host
            .as_deref()
            .map(JwksVerifier::new);

        let mailer: Arc<dyn crate::service::mailer::Mailer> =
            Arc::new(crate::service::mailer::NoopMailer);
        let auth_service = Arc::new(AuthService::new(
            pool.clone(),
            tokens.clone(),
            config.clone(),
            mailer,
            jwks,
        ));

        let postgrest = Arc::new(PostgrestProxy::new(
            config.postgrest_base_url.clone(),
            config.api_keys.clone(),
            tokens.clone(),
        ));

        let hub = Hub::new(pool.clone());

        Ok(Self {
            pool,
            config,
            tokens,
            csrf,
            pkce,
            oauth,
            oauth_verifiers,
            auth_service,
            postgrest,
            hub,
        })
    }
}

type AppResultState = crate::error::AppResult<AppState>;
