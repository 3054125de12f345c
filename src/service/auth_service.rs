use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::otp::{OtpService, Purpose};
use crate::auth::token::{Role, TokenService};
use crate::auth::{hash_password, validate_password, verify_password, JwksVerifier};
use crate::config::{Config, VerificationMethod};
use crate::error::{AppError, AppResult};
use crate::models::{Account, AccountDto, AccountProvider};
use crate::oauth::Identity;
use crate::service::mailer::Mailer;

/// What a login/register/verify/OAuth-callback operation produced, for the
/// HTTP layer to translate into either a direct token pair or a PKCE
/// authorization code (section 4.6, "Session issue side effects").
pub enum AuthOutcome {
    PendingVerification,
    Issued {
        user: AccountDto,
        access_token: String,
        refresh_token: String,
    },
}

/// Registration/login/verification/reset/admin-session/OAuth-linking logic
/// (C6), built around a transactional existence-check-then-insert pattern
/// against the account/OAuth-identity table split this system requires.
pub struct AuthService {
    pool: PgPool,
    tokens: TokenService,
    config: Arc<Config>,
    mailer: Arc<dyn Mailer>,
    jwks: Option<JwksVerifier>,
}

impl AuthService {
    pub fn new(
        pool: PgPool,
        tokens: TokenService,
        config: Arc<Config>,
        mailer: Arc<dyn Mailer>,
        jwks: Option<JwksVerifier>,
    ) -> Self {
        Self {
            pool,
            tokens,
            config,
            mailer,
            jwks,
        }
    }

    fn issue_outcome(&self, account: &Account) -> AppResult<AuthOutcome> {
        let dto = AccountDto::from(account.clone());
        let access_token =
            self.tokens
                .issue_access(account.id, Some(account.email.clone()), Role::Authenticated)?;
        let refresh_token =
            self.tokens
                .issue_refresh(account.id, Some(account.email.clone()), Role::Authenticated)?;
        Ok(AuthOutcome::Issued {
            user: dto,
            access_token,
            refresh_token,
        })
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
    ) -> AppResult<AuthOutcome> {
        validate_password(password, &self.config.password_policy)?;
        let password_hash = hash_password(password)?;

        let mut tx = self.pool.begin().await?;
        let account = insert_account(&mut tx, email, Some(&password_hash), name.as_deref()).await?;
        tx.commit().await?;

        if self.config.require_email_verification {
            self.issue_verification(email).await?;
            return Ok(AuthOutcome::PendingVerification);
        }

        self.issue_outcome(&account)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthOutcome> {
        let account = find_account_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".into()))?;

        let Some(hash) = account.password_hash.as_deref() else {
            return Err(AppError::Unauthorized("Invalid email or password".into()));
        };
        if !verify_password(password, hash)? {
            return Err(AppError::Unauthorized("Invalid email or password".into()));
        }

        if self.config.require_email_verification && !account.email_verified {
            return Err(AppError::Forbidden("Email not verified".into()));
        }

        self.issue_outcome(&account)
    }

    async fn issue_verification(&self, email: &str) -> AppResult<()> {
        match self.config.email_verification_method {
            VerificationMethod::Code => {
                let code = OtpService::issue_code(&self.pool, email, Purpose::VerifyEmail).await?;
                self.mailer.send_verification_code(email, &code).await;
            }
            VerificationMethod::Link => {
                let (token, _) = OtpService::issue_token(&self.pool, email, Purpose::VerifyEmail).await?;
                self.mailer.send_verification_link(email, &token).await;
            }
        }
        Ok(())
    }

    /// Silently succeeds when the account doesn't exist (user-enumeration
    /// prevention, section 4.6).
    pub async fn send_verification_email(&self, email: &str) -> AppResult<()> {
        if find_account_by_email(&self.pool, email).await?.is_none() {
            return Ok(());
        }
        self.issue_verification(email).await
    }

    pub async fn send_reset_password_email(&self, email: &str) -> AppResult<()> {
        if find_account_by_email(&self.pool, email).await?.is_none() {
            return Ok(());
        }
        match self.config.email_verification_method {
            VerificationMethod::Code => {
                let code = OtpService::issue_code(&self.pool, email, Purpose::ResetPassword).await?;
                self.mailer.send_reset_code(email, &code).await;
            }
            VerificationMethod::Link => {
                let (token, _) = OtpService::issue_token(&self.pool, email, Purpose::ResetPassword).await?;
                self.mailer.send_reset_link(email, &token).await;
            }
        }
        Ok(())
    }

    pub async fn verify_email_with_code(&self, email: &str, code: &str) -> AppResult<AuthOutcome> {
        let mut tx = self.pool.begin().await?;
        OtpService::verify_with_code(&mut *tx, email, Purpose::VerifyEmail, code).await?;
        let account = mark_email_verified(&mut tx, email).await?;
        tx.commit().await?;
        self.issue_outcome(&account)
    }

    pub async fn verify_email_with_token(&self, token: &str) -> AppResult<AuthOutcome> {
        let mut tx = self.pool.begin().await?;
        let email = OtpService::verify_with_token(&mut *tx, Purpose::VerifyEmail, token).await?;
        let account = mark_email_verified(&mut tx, &email).await?;
        tx.commit().await?;
        self.issue_outcome(&account)
    }

    /// Validates the new password *before* consuming the OTP, so a weak
    /// password can be retried with the same token (section 4.6).
    pub async fn reset_password_with_token(&self, new_password: &str, token: &str) -> AppResult<()> {
        validate_password(new_password, &self.config.password_policy)?;
        let password_hash = hash_password(new_password)?;

        let mut tx = self.pool.begin().await?;
        let email = OtpService::verify_with_token(&mut *tx, Purpose::ResetPassword, token).await?;
        update_password_hash(&mut tx, &email, &password_hash).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Never touches the database — strict equality against
    /// process-configured admin credentials (section 4.6).
    pub fn admin_login(&self, email: &str, password: &str) -> AppResult<String> {
        if email != self.config.admin_email || password != self.config.admin_password {
            return Err(AppError::Unauthorized("Invalid admin credentials".into()));
        }
        self.tokens.issue_admin()
    }

    pub async fn admin_login_with_authorization_code(&self, token: &str) -> AppResult<String> {
        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| AppError::ServiceUnavailable("Cloud broker not configured".into()))?;
        jwks.verify(token, self.config.project_id.as_deref()).await?;
        self.tokens.issue_admin()
    }

    pub async fn find_or_create_third_party_user(&self, identity: Identity) -> AppResult<AuthOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = find_provider(&mut tx, &identity.provider, &identity.provider_id).await? {
            let account = touch_and_verify(&mut tx, existing.account_id).await?;
            tx.commit().await?;
            return self.issue_outcome(&account);
        }

        if let Some(account) = find_account_by_email_tx(&mut tx, &identity.email).await? {
            link_provider(&mut tx, account.id, &identity).await?;
            let account = touch_and_verify(&mut tx, account.id).await?;
            tx.commit().await?;
            return self.issue_outcome(&account);
        }

        let account = insert_account(&mut tx, &identity.email, None, identity.user_name.as_deref()).await?;
        let account = mark_email_verified_tx(&mut tx, account.id).await?;
        link_provider(&mut tx, account.id, &identity).await?;
        tx.commit().await?;
        self.issue_outcome(&account)
    }

    pub async fn list_users(
        &self,
        limit: i64,
        offset: i64,
        search: Option<&str>,
    ) -> AppResult<Vec<AccountDto>> {
        let rows = if let Some(search) = search {
            let pattern = format!("%{search}%");
            sqlx::query_as::<_, Account>(
                "SELECT * FROM auth.accounts WHERE email ILIKE $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Account>(
                "SELECT * FROM auth.accounts ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.into_iter().map(AccountDto::from).collect())
    }

    pub async fn delete_users(&self, ids: &[Uuid]) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM auth.accounts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_account(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    password_hash: Option<&str>,
    name: Option<&str>,
) -> AppResult<Account> {
    sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO auth.accounts (email, password_hash, name, email_verified)
        VALUES ($1, $2, $3, false)
        RETURNING *
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}

async fn find_account_by_email(pool: &PgPool, email: &str) -> AppResult<Option<Account>> {
    sqlx::query_as::<_, Account>("SELECT * FROM auth.accounts WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}

async fn find_account_by_email_tx(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> AppResult<Option<Account>> {
    sqlx::query_as::<_, Account>("SELECT * FROM auth.accounts WHERE email = $1")
        .bind(email)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Into::into)
}

async fn mark_email_verified(tx: &mut Transaction<'_, Postgres>, email: &str) -> AppResult<Account> {
    sqlx::query_as::<_, Account>(
        "UPDATE auth.accounts SET email_verified = true, updated_at = NOW() WHERE email = $1 RETURNING *",
    )
    .bind(email)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}

async fn mark_email_verified_tx(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> AppResult<Account> {
    sqlx::query_as::<_, Account>(
        "UPDATE auth.accounts SET email_verified = true, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}

async fn touch_and_verify(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> AppResult<Account> {
    mark_email_verified_tx(tx, id).await
}

async fn update_password_hash(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    password_hash: &str,
) -> AppResult<()> {
    sqlx::query("UPDATE auth.accounts SET password_hash = $1, updated_at = NOW() WHERE email = $2")
        .bind(password_hash)
        .bind(email)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn find_provider(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    provider_id: &str,
) -> AppResult<Option<AccountProvider>> {
    sqlx::query_as::<_, AccountProvider>(
        "SELECT * FROM auth.account_providers WHERE provider = $1 AND provider_id = $2",
    )
    .bind(provider)
    .bind(provider_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(Into::into)
}

async fn link_provider(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    identity: &Identity,
) -> AppResult<AccountProvider> {
    sqlx::query_as::<_, AccountProvider>(
        r#"
        INSERT INTO auth.account_providers (account_id, provider, provider_id, identity_data)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(&identity.provider)
    .bind(&identity.provider_id)
    .bind(&identity.identity_data)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}
