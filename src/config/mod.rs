use std::env;

/// How an account proves it controls an email address during verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationMethod {
    /// A 6-digit numeric code the user types back in.
    Code,
    /// A long hex token delivered as a clickable link.
    Link,
}

/// Per-provider OAuth credentials, or a flag electing the cloud-broker path.
#[derive(Clone, Debug, Default)]
pub struct OAuthProviderConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Apple only: PKCS8 private key used to sign the per-request ES256 client secret.
    pub private_key_pem: Option<String>,
    pub team_id: Option<String>,
    pub key_id: Option<String>,
    pub use_cloud_broker: bool,
    /// Overrides the default `{public_url}/auth/oauth/{provider}/callback`.
    pub redirect_uri: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_digit: bool,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_digit: true,
            require_lowercase: true,
            require_uppercase: true,
            require_special: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_dev: bool,
    pub allowed_origins: Vec<String>,

    pub admin_email: String,
    pub admin_password: String,
    pub project_id: Option<String>,
    pub cloud_api_host: Option<String>,
    pub postgrest_base_url: String,
    pub db_encryption_key: Option<String>,
    /// API keys eligible for the PostgREST proxy's upgrade-to-admin-JWT path
    /// (section 4.7). Comma-separated in `API_KEYS`.
    pub api_keys: Vec<String>,

    pub require_email_verification: bool,
    pub email_verification_method: VerificationMethod,
    pub password_policy: PasswordPolicy,

    pub max_file_size: u64,

    /// Publicly reachable base URL, used to build default OAuth redirect
    /// URIs (`{public_url}/auth/oauth/{provider}/callback`).
    pub public_url: String,

    pub oauth: std::collections::HashMap<String, OAuthProviderConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")?;

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_default();

        let email_verification_method = match env::var("EMAIL_VERIFICATION_METHOD")
            .unwrap_or_else(|_| "code".to_string())
            .as_str()
        {
            "link" => VerificationMethod::Link,
            _ => VerificationMethod::Code,
        };

        let mut oauth = std::collections::HashMap::new();
        for provider in [
            "google",
            "github",
            "discord",
            "linkedin",
            "facebook",
            "microsoft",
            "x",
            "apple",
        ] {
            let prefix = provider.to_uppercase();
            oauth.insert(
                provider.to_string(),
                OAuthProviderConfig {
                    client_id: env::var(format!("{prefix}_CLIENT_ID")).ok(),
                    client_secret: env::var(format!("{prefix}_CLIENT_SECRET")).ok(),
                    private_key_pem: env::var(format!("{prefix}_PRIVATE_KEY")).ok(),
                    team_id: env::var(format!("{prefix}_TEAM_ID")).ok(),
                    key_id: env::var(format!("{prefix}_KEY_ID")).ok(),
                    use_cloud_broker: env::var(format!("{prefix}_USE_CLOUD_BROKER"))
                        .map(|v| v == "true")
                        .unwrap_or(false),
                    redirect_uri: env::var(format!("{prefix}_REDIRECT_URI")).ok(),
                },
            );
        }

        let public_url = env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            is_dev,
            allowed_origins,

            admin_email: env::var("ADMIN_EMAIL").unwrap_or_default(),
            admin_password: env::var("ADMIN_PASSWORD").unwrap_or_default(),
            project_id: env::var("PROJECT_ID").ok(),
            cloud_api_host: env::var("CLOUD_API_HOST").ok(),
            postgrest_base_url: env::var("POSTGREST_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
            db_encryption_key: env::var("DB_ENCRYPTION_KEY").ok(),
            api_keys: env::var("API_KEYS")
                .ok()
                .map(|s| s.split(',').map(|k| k.trim().to_string()).collect())
                .unwrap_or_default(),

            require_email_verification: env::var("REQUIRE_EMAIL_VERIFICATION")
                .map(|v| v == "true")
                .unwrap_or(false),
            email_verification_method,
            password_policy: PasswordPolicy::default(),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50 * 1024 * 1024),

            public_url,
            oauth,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
