use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

// ============================================================================
// Claims
// ============================================================================

/// `role` claim values (section 3). `Display` renders the same
/// `snake_case` literal the JWT claim and Postgres `SET LOCAL ROLE`
/// both expect, so callers never hand-maintain a parallel string table.
#[derive(Debug, Serialize, Deserialize, Display, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Authenticated,
    ProjectAdmin,
    Anon,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    /// Present only on refresh tokens; access tokens omit it entirely so a
    /// refresh token can never be mistaken for one by a missing-field bug.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub token_type: Option<TokenType>,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthorized("Invalid token subject".into()))
    }
}

// Fixed sub values for tokens that don't correspond to a real account row.
pub const ADMIN_SUBJECT: &str = "00000000-0000-0000-0000-000000000000";
pub const ANON_SUBJECT: &str = "00000000-0000-0000-0000-000000000001";

const ACCESS_TTL_DAYS: i64 = 7;
/// Also governs the `refresh_token` cookie's `Max-Age` (section 6).
pub const REFRESH_TTL_DAYS: i64 = 7;
/// "No expiry" is modeled as a very far future timestamp rather than omitting
/// `exp`, since jsonwebtoken's default `Validation` requires the claim.
const NO_EXPIRY_YEARS: i64 = 100;

/// HS256 access/refresh/admin/anon JWT issuance and verification.
///
/// Construction is fallible: an empty secret is refused at startup per
/// section 4.1 ("if the HS256 secret is absent ... the component refuses to
/// initialise").
#[derive(Clone)]
pub struct TokenService {
    secret: std::sync::Arc<str>,
}

impl TokenService {
    pub fn new(secret: &str) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::Internal);
        }
        Ok(Self {
            secret: std::sync::Arc::from(secret),
        })
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.secret.as_bytes())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.secret.as_bytes())
    }

    pub fn issue_access(&self, subject: Uuid, email: Option<String>, role: Role) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            email,
            role,
            iat: now.timestamp(),
            exp: (now + Duration::days(ACCESS_TTL_DAYS)).timestamp(),
            token_type: None,
        };
        encode(&Header::default(), &claims, &self.encoding_key()).map_err(Into::into)
    }

    pub fn issue_refresh(&self, subject: Uuid, email: Option<String>, role: Role) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            email,
            role,
            iat: now.timestamp(),
            exp: (now + Duration::days(REFRESH_TTL_DAYS)).timestamp(),
            token_type: Some(TokenType::Refresh),
        };
        encode(&Header::default(), &claims, &self.encoding_key()).map_err(Into::into)
    }

    /// No-expiry admin token, used internally only (section 4.1).
    pub fn issue_admin(&self) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: ADMIN_SUBJECT.to_string(),
            email: None,
            role: Role::ProjectAdmin,
            iat: now.timestamp(),
            exp: (now + Duration::days(365 * NO_EXPIRY_YEARS)).timestamp(),
            token_type: None,
        };
        encode(&Header::default(), &claims, &self.encoding_key()).map_err(Into::into)
    }

    pub fn issue_anon(&self) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: ANON_SUBJECT.to_string(),
            email: None,
            role: Role::Anon,
            iat: now.timestamp(),
            exp: (now + Duration::days(365 * NO_EXPIRY_YEARS)).timestamp(),
            token_type: None,
        };
        encode(&Header::default(), &claims, &self.encoding_key()).map_err(Into::into)
    }

    pub fn verify_access(&self, token: &str) -> AppResult<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key(), &Validation::default())
            .map(|d| d.claims)?;
        if claims.token_type.is_some() {
            return Err(AppError::Unauthorized("Invalid token type".into()));
        }
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> AppResult<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key(), &Validation::default())
            .map(|d| d.claims)?;
        if claims.token_type != Some(TokenType::Refresh) {
            return Err(AppError::Unauthorized("Invalid token type".into()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-min-32-characters-long!!";

    #[test]
    fn access_token_roundtrip() {
        let svc = TokenService::new(SECRET).unwrap();
        let id = Uuid::new_v4();
        let token = svc
            .issue_access(id, Some("a@b.c".into()), Role::Authenticated)
            .unwrap();
        let claims = svc.verify_access(&token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.role, Role::Authenticated);
        assert!(claims.token_type.is_none());
    }

    #[test]
    fn refresh_token_carries_type() {
        let svc = TokenService::new(SECRET).unwrap();
        let id = Uuid::new_v4();
        let token = svc
            .issue_refresh(id, None, Role::Authenticated)
            .unwrap();
        let claims = svc.verify_refresh(&token).unwrap();
        assert_eq!(claims.token_type, Some(TokenType::Refresh));
    }

    #[test]
    fn verify_access_rejects_refresh_token() {
        let svc = TokenService::new(SECRET).unwrap();
        let token = svc
            .issue_refresh(Uuid::new_v4(), None, Role::Authenticated)
            .unwrap();
        assert!(svc.verify_access(&token).is_err());
    }

    #[test]
    fn verify_refresh_rejects_access_token() {
        let svc = TokenService::new(SECRET).unwrap();
        let token = svc
            .issue_access(Uuid::new_v4(), None, Role::Authenticated)
            .unwrap();
        assert!(svc.verify_refresh(&token).is_err());
    }

    #[test]
    fn admin_token_has_admin_role_and_fixed_subject() {
        let svc = TokenService::new(SECRET).unwrap();
        let token = svc.issue_admin().unwrap();
        let claims = svc.verify_access(&token).unwrap();
        assert_eq!(claims.role, Role::ProjectAdmin);
        assert_eq!(claims.sub, ADMIN_SUBJECT);
    }

    #[test]
    fn anon_token_has_anon_role() {
        let svc = TokenService::new(SECRET).unwrap();
        let token = svc.issue_anon().unwrap();
        let claims = svc.verify_access(&token).unwrap();
        assert_eq!(claims.role, Role::Anon);
    }

    #[test]
    fn wrong_secret_rejected() {
        let svc = TokenService::new(SECRET).unwrap();
        let other = TokenService::new("a-totally-different-secret-value!!").unwrap();
        let token = svc
            .issue_access(Uuid::new_v4(), None, Role::Authenticated)
            .unwrap();
        assert!(other.verify_access(&token).is_err());
    }

    #[test]
    fn empty_secret_refuses_to_initialise() {
        assert!(TokenService::new("").is_err());
    }

    #[test]
    fn claims_user_id_rejects_non_uuid_sub() {
        let claims = Claims {
            sub: "not-a-uuid".into(),
            email: None,
            role: Role::Authenticated,
            iat: 0,
            exp: 9_999_999_999,
            token_type: None,
        };
        assert!(claims.user_id().is_err());
    }
}
