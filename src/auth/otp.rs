use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgConnection, PgExecutor};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    VerifyEmail,
    ResetPassword,
}

impl Purpose {
    fn as_str(&self) -> &'static str {
        match self {
            Purpose::VerifyEmail => "VERIFY_EMAIL",
            Purpose::ResetPassword => "RESET_PASSWORD",
        }
    }
}

const CODE_TTL_MINUTES: i64 = 15;
const TOKEN_TTL_MINUTES: i64 = 60;
const MAX_ATTEMPTS: i32 = 5;

fn hash_otp(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

fn random_numeric_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

fn random_hex_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Numeric-code and hash-token one-time-password issuance/verification
/// (section 4.4), backed by an `auth.otps` table keyed by `(email,
/// purpose)`. Every operation here is meant to run inside the caller's
/// database transaction so OTP consumption is atomic with the state change
/// it guards (e.g. flipping `email_verified`).
pub struct OtpService;

impl OtpService {
    /// Issues a fresh 6-digit numeric code, replacing any unexpired row for
    /// the same `(email, purpose)`.
    pub async fn issue_code<'c>(
        exec: impl PgExecutor<'c>,
        email: &str,
        purpose: Purpose,
    ) -> AppResult<String> {
        let code = random_numeric_code();
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);
        upsert(exec, email, purpose, &hash_otp(&code), expires_at).await?;
        Ok(code)
    }

    /// Issues a fresh 64-hex-char magic token.
    pub async fn issue_token<'c>(
        exec: impl PgExecutor<'c>,
        email: &str,
        purpose: Purpose,
    ) -> AppResult<(String, DateTime<Utc>)> {
        let token = random_hex_token();
        let expires_at = Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES);
        upsert(exec, email, purpose, &hash_otp(&token), expires_at).await?;
        Ok((token, expires_at))
    }

    /// Verifies a numeric code for `(email, purpose)`. Increments the attempt
    /// counter on every call (including failures) and deletes the row on
    /// success, making the code single-use.
    ///
    /// Takes a live connection (not a generic executor) because it issues
    /// more than one statement and needs to reborrow it between them — this
    /// is meant to run inside the caller's open transaction (section 4.4).
    pub async fn verify_with_code(
        conn: &mut PgConnection,
        email: &str,
        purpose: Purpose,
        code: &str,
    ) -> AppResult<()> {
        let row = sqlx::query_as::<_, OtpRow>(
            r#"
            UPDATE auth.otps
            SET attempts = attempts + 1
            WHERE email = $1 AND purpose = $2
            RETURNING otp_hash, expires_at, attempts
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Err(AppError::Unauthorized("Invalid or expired code".into()));
        };

        if row.expires_at < Utc::now() {
            delete(&mut *conn, email, purpose).await?;
            return Err(AppError::Unauthorized("Invalid or expired code".into()));
        }
        if row.attempts > MAX_ATTEMPTS {
            delete(&mut *conn, email, purpose).await?;
            return Err(AppError::Unauthorized("Too many attempts".into()));
        }
        if row.otp_hash != hash_otp(code) {
            return Err(AppError::Unauthorized("Invalid or expired code".into()));
        }

        delete(&mut *conn, email, purpose).await?;
        Ok(())
    }

    /// Verifies a magic token across all emails for a given purpose (tokens
    /// are looked up by hash, not by a caller-supplied email) and returns the
    /// associated email on success.
    pub async fn verify_with_token(
        conn: &mut PgConnection,
        purpose: Purpose,
        token: &str,
    ) -> AppResult<String> {
        let hash = hash_otp(token);
        let row = sqlx::query_as::<_, OtpTokenRow>(
            r#"
            SELECT email, expires_at FROM auth.otps
            WHERE purpose = $1 AND otp_hash = $2
            "#,
        )
        .bind(purpose.as_str())
        .bind(&hash)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Err(AppError::Unauthorized("Invalid or expired token".into()));
        };

        if row.expires_at < Utc::now() {
            delete(&mut *conn, &row.email, purpose).await?;
            return Err(AppError::Unauthorized("Invalid or expired token".into()));
        }

        delete(&mut *conn, &row.email, purpose).await?;
        Ok(row.email)
    }

    /// Verifies the code then immediately issues a fresh hash-token under the
    /// same purpose, so a code-entry step and a later password-reset POST can
    /// be separated without re-exposing the original code (section 4.4).
    pub async fn exchange_code_for_token(
        conn: &mut PgConnection,
        email: &str,
        purpose: Purpose,
        code: &str,
    ) -> AppResult<(String, DateTime<Utc>)> {
        Self::verify_with_code(&mut *conn, email, purpose, code).await?;
        Self::issue_token(&mut *conn, email, purpose).await
    }
}

#[derive(FromRow)]
struct OtpRow {
    otp_hash: String,
    expires_at: DateTime<Utc>,
    attempts: i32,
}

#[derive(FromRow)]
struct OtpTokenRow {
    email: String,
    expires_at: DateTime<Utc>,
}

async fn upsert<'c>(
    exec: impl PgExecutor<'c>,
    email: &str,
    purpose: Purpose,
    otp_hash: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO auth.otps (email, purpose, otp_hash, expires_at, attempts)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (email, purpose)
        DO UPDATE SET otp_hash = EXCLUDED.otp_hash,
                      expires_at = EXCLUDED.expires_at,
                      attempts = 0
        "#,
    )
    .bind(email)
    .bind(purpose.as_str())
    .bind(otp_hash)
    .bind(expires_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn delete<'c>(exec: impl PgExecutor<'c>, email: &str, purpose: Purpose) -> AppResult<()> {
    sqlx::query("DELETE FROM auth.otps WHERE email = $1 AND purpose = $2")
        .bind(email)
        .bind(purpose.as_str())
        .execute(exec)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_otp_is_deterministic_and_sensitive_to_input() {
        assert_eq!(hash_otp("123456"), hash_otp("123456"));
        assert_ne!(hash_otp("123456"), hash_otp("654321"));
    }

    #[test]
    fn random_numeric_code_is_six_digits() {
        let code = random_numeric_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn random_hex_token_is_64_hex_chars() {
        let token = random_hex_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn purpose_strings_are_scoped_distinctly() {
        assert_ne!(Purpose::VerifyEmail.as_str(), Purpose::ResetPassword.as_str());
    }
}
