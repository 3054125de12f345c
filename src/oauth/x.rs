use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use serde_json::Value;

use crate::config::OAuthProviderConfig;
use crate::error::{AppError, AppResult};
use crate::oauth::{synthesize_email, CallbackParams, Identity, OAuthProvider, OAuthVerifierStore};

const AUTH_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const USERINFO_URL: &str = "https://api.twitter.com/2/users/me?user.fields=profile_image_url";

type XOauth2Client = OAuth2Client<
    BasicErrorResponse,
    StandardTokenResponse<oauth2::EmptyExtraTokenFields, BasicTokenType>,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// X (Twitter) requires PKCE unconditionally — unlike the other six
/// providers, where it's offered but not load-bearing (section 4.5).
pub struct XProvider {
    http: reqwest::Client,
    client: XOauth2Client,
    verifiers: OAuthVerifierStore,
}

impl XProvider {
    pub fn new(config: OAuthProviderConfig, http: reqwest::Client, verifiers: OAuthVerifierStore) -> Self {
        let redirect_uri = config
            .redirect_uri
            .clone()
            .unwrap_or_else(|| "http://localhost:8080/auth/oauth/x/callback".to_string());

        let mut client = OAuth2Client::new(ClientId::new(config.client_id.unwrap_or_default()))
            .set_auth_uri(AuthUrl::new(AUTH_URL.to_string()).expect("static auth url is valid"))
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).expect("static token url is valid"))
            .set_redirect_uri(RedirectUrl::new(redirect_uri).expect("configured redirect uri is valid"));

        if let Some(secret) = config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret));
        }

        Self {
            http,
            client,
            verifiers,
        }
    }
}

#[derive(Deserialize)]
struct XUser {
    id: String,
    username: String,
    name: Option<String>,
    profile_image_url: Option<String>,
}

#[derive(Deserialize)]
struct XUserResponse {
    data: XUser,
}

#[async_trait]
impl OAuthProvider for XProvider {
    fn id(&self) -> &'static str {
        "x"
    }

    async fn authorize_url(&self, state: &str) -> AppResult<String> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        self.verifiers
            .store(state.to_string(), verifier.secret().clone())
            .await;

        let request = self
            .client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .set_pkce_challenge(challenge)
            .add_scope(Scope::new("tweet.read".to_string()))
            .add_scope(Scope::new("users.read".to_string()));

        Ok(request.url().0.to_string())
    }

    async fn callback(&self, params: CallbackParams) -> AppResult<Identity> {
        let code = params
            .code
            .ok_or_else(|| AppError::InvalidInput("Missing authorization code".into()))?;
        let state = params
            .state
            .ok_or_else(|| AppError::InvalidInput("X requires a state parameter".into()))?;

        let verifier = self
            .verifiers
            .take(&state)
            .ok_or_else(|| AppError::Unauthorized("Unknown or expired OAuth state".into()))?;

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(&self.http)
            .await
            .map_err(|e| AppError::Unauthorized(format!("x code exchange failed: {e}")))?;

        let resp = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("x userinfo fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "x userinfo endpoint returned {}",
                resp.status()
            )));
        }

        let body: XUserResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("x userinfo body invalid: {e}")))?;

        let identity_data: Value = serde_json::json!({
            "id": body.data.id,
            "username": body.data.username,
            "name": body.data.name,
        });

        Ok(Identity {
            provider: "x".to_string(),
            provider_id: body.data.id.clone(),
            email: synthesize_email("x", &body.data.username),
            user_name: Some(body.data.username),
            avatar_url: body.data.profile_image_url,
            identity_data,
        })
    }
}
