use std::collections::HashMap;

use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, EndpointNotSet,
    EndpointSet, ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OAuthProviderConfig;
use crate::error::{AppError, AppResult};
use crate::oauth::{synthesize_email, CallbackParams, Identity, OAuthProvider, OAuthVerifierStore};

#[derive(Clone, Deserialize, Serialize)]
pub(crate) struct ExtraFields {
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
impl ExtraTokenFields for ExtraFields {}

pub(crate) type OauthTokenResponse = StandardTokenResponse<ExtraFields, BasicTokenType>;

pub(crate) type StandardOauth2Client = OAuth2Client<
    BasicErrorResponse,
    OauthTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Static per-provider endpoint/scope table for the six providers that share
/// a plain OAuth 2.0 authorization-code flow (section 4.5).
pub struct ProviderSpec {
    pub id: &'static str,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub userinfo_url: &'static str,
    pub scopes: &'static [&'static str],
}

pub static STANDARD_PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        id: "google",
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo",
        scopes: &["openid", "email", "profile"],
    },
    ProviderSpec {
        id: "github",
        auth_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        userinfo_url: "https://api.github.com/user",
        scopes: &["read:user", "user:email"],
    },
    ProviderSpec {
        id: "discord",
        auth_url: "https://discord.com/api/oauth2/authorize",
        token_url: "https://discord.com/api/oauth2/token",
        userinfo_url: "https://discord.com/api/users/@me",
        scopes: &["identify", "email"],
    },
    ProviderSpec {
        id: "linkedin",
        auth_url: "https://www.linkedin.com/oauth/v2/authorization",
        token_url: "https://www.linkedin.com/oauth/v2/accessToken",
        userinfo_url: "https://api.linkedin.com/v2/userinfo",
        scopes: &["openid", "profile", "email"],
    },
    ProviderSpec {
        id: "facebook",
        auth_url: "https://www.facebook.com/v19.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
        userinfo_url: "https://graph.facebook.com/me?fields=id,name,email,picture",
        scopes: &["email", "public_profile"],
    },
    ProviderSpec {
        id: "microsoft",
        auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
        token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        userinfo_url: "https://graph.microsoft.com/oidc/userinfo",
        scopes: &["openid", "email", "profile"],
    },
];

pub struct StandardProvider {
    spec: &'static ProviderSpec,
    http: reqwest::Client,
    client: StandardOauth2Client,
    verifiers: OAuthVerifierStore,
}

impl StandardProvider {
    pub fn new(
        spec: &'static ProviderSpec,
        config: OAuthProviderConfig,
        http: reqwest::Client,
        public_url: &str,
        verifiers: OAuthVerifierStore,
    ) -> Self {
        let redirect_uri = config
            .redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{public_url}/auth/oauth/{}/callback", spec.id));

        let mut client = OAuth2Client::new(ClientId::new(config.client_id.unwrap_or_default()))
            .set_auth_uri(AuthUrl::new(spec.auth_url.to_string()).expect("static auth url is valid"))
            .set_token_uri(TokenUrl::new(spec.token_url.to_string()).expect("static token url is valid"))
            .set_redirect_uri(RedirectUrl::new(redirect_uri).expect("configured redirect uri is valid"));

        if let Some(secret) = config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret));
        }

        Self {
            spec,
            http,
            client,
            verifiers,
        }
    }

    async fn fetch_userinfo(&self, access_token: &str) -> AppResult<Value> {
        let resp = self
            .http
            .get(self.spec.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("{} userinfo fetch failed: {e}", self.spec.id)))?;

        if !resp.status().is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "{} userinfo endpoint returned {}",
                self.spec.id,
                resp.status()
            )));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("{} userinfo body invalid: {e}", self.spec.id)))
    }

    /// GitHub's primary user endpoint omits `email` when it's kept private;
    /// section 4.5 requires falling back to `/user/emails`, then to the
    /// synthesized `login@users.noreply.github.com`.
    async fn github_email_fallback(&self, access_token: &str, login: &str) -> AppResult<String> {
        let resp = self
            .http
            .get("https://api.github.com/user/emails")
            .bearer_auth(access_token)
            .header("User-Agent", "insforge-server")
            .send()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("github emails fetch failed: {e}")))?;

        if resp.status().is_success() {
            if let Ok(emails) = resp.json::<Vec<GitHubEmail>>().await {
                if let Some(primary) = emails.iter().find(|e| e.primary).or_else(|| emails.first()) {
                    return Ok(primary.email.clone());
                }
            }
        }

        Ok(format!("{login}@users.noreply.github.com"))
    }

    fn parse_identity(&self, json: &Value) -> AppResult<(String, String, Option<String>, Option<String>)> {
        match self.spec.id {
            "google" | "linkedin" | "microsoft" => {
                let id = json["sub"].as_str().unwrap_or_default().to_string();
                let email = json["email"].as_str().unwrap_or_default().to_string();
                let name = json["name"].as_str().map(str::to_string);
                let avatar = json["picture"].as_str().map(str::to_string);
                Ok((id, email, name, avatar))
            }
            "github" => {
                let id = json["id"].as_i64().map(|n| n.to_string()).unwrap_or_default();
                let email = json["email"].as_str().unwrap_or_default().to_string();
                let name = json["name"].as_str().map(str::to_string);
                let avatar = json["avatar_url"].as_str().map(str::to_string);
                Ok((id, email, name, avatar))
            }
            "discord" => {
                let id = json["id"].as_str().unwrap_or_default().to_string();
                let email = json["email"].as_str().unwrap_or_default().to_string();
                let name = json["username"].as_str().map(str::to_string);
                let avatar = json["avatar"].as_str().map(|a| {
                    format!("https://cdn.discordapp.com/avatars/{id}/{a}.png")
                });
                Ok((id, email, name, avatar))
            }
            "facebook" => {
                let id = json["id"].as_str().unwrap_or_default().to_string();
                let email = json["email"].as_str().unwrap_or_default().to_string();
                let name = json["name"].as_str().map(str::to_string);
                let avatar = json["picture"]["data"]["url"].as_str().map(str::to_string);
                Ok((id, email, name, avatar))
            }
            _ => Err(AppError::Internal),
        }
    }
}

#[derive(Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
}

#[async_trait]
impl OAuthProvider for StandardProvider {
    fn id(&self) -> &'static str {
        self.spec.id
    }

    async fn authorize_url(&self, state: &str) -> AppResult<String> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        self.verifiers
            .store(state.to_string(), verifier.secret().clone())
            .await;

        let mut request = self
            .client
            .authorize_url(|| oauth2::CsrfToken::new(state.to_string()))
            .set_pkce_challenge(challenge);

        for scope in self.spec.scopes {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }

        Ok(request.url().0.to_string())
    }

    async fn callback(&self, params: CallbackParams) -> AppResult<Identity> {
        let code = params
            .code
            .ok_or_else(|| AppError::InvalidInput("Missing authorization code".into()))?;
        let state = params
            .state
            .ok_or_else(|| AppError::InvalidInput("Missing state".into()))?;

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
            .map_err(|e| AppError::Unauthorized(format!("{} code exchange failed: {e}", self.spec.id)))?;

        let userinfo = self.fetch_userinfo(token.access_token().secret()).await?;
        let (provider_id, mut email, user_name, avatar_url) = self.parse_identity(&userinfo)?;

        if email.is_empty() {
            email = if self.spec.id == "github" {
                let login = userinfo["login"].as_str().unwrap_or(&provider_id);
                self.github_email_fallback(token.access_token().secret(), login).await?
            } else {
                synthesize_email(self.spec.id, &provider_id)
            };
        }

        Ok(Identity {
            provider: self.spec.id.to_string(),
            provider_id,
            email,
            user_name,
            avatar_url,
            identity_data: userinfo,
        })
    }
}
