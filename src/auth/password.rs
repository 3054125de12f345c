use crate::config::PasswordPolicy;
use crate::error::{AppError, AppResult};

const BCRYPT_COST: u32 = 10;

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| {
        tracing::error!(error = ?e, "Failed to hash password");
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!(error = ?e, "Failed to verify password hash");
        AppError::Internal
    })
}

/// Validates a candidate password against the configured policy, returning a
/// human-readable list of every rule it fails (not just the first), so a
/// client can render all the feedback in one round trip.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> AppResult<()> {
    let mut violations = Vec::new();

    if password.chars().count() < policy.min_length {
        violations.push(format!("must be at least {} characters", policy.min_length));
    }
    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("must contain a digit".to_string());
    }
    if policy.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push("must contain a lowercase letter".to_string());
    }
    if policy.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push("must contain an uppercase letter".to_string());
    }
    if policy.require_special && !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        violations.push("must contain a special character".to_string());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "Password {}",
            violations.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let hash = hash_password("correct horse battery staple 1!A").unwrap();
        assert!(verify_password("correct horse battery staple 1!A", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn validate_password_accepts_policy_compliant_password() {
        let policy = PasswordPolicy::default();
        assert!(validate_password("Abcdef1!", &policy).is_ok());
    }

    #[test]
    fn validate_password_rejects_every_rule_violation() {
        let policy = PasswordPolicy::default();
        let err = validate_password("abc", &policy).unwrap_err();
        let AppError::InvalidInput(msg) = err else {
            panic!("expected InvalidInput");
        };
        assert!(msg.contains("8 characters"));
        assert!(msg.contains("digit"));
        assert!(msg.contains("uppercase"));
        assert!(msg.contains("special"));
    }

    #[test]
    fn validate_password_respects_relaxed_policy() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_digit: false,
            require_lowercase: false,
            require_uppercase: false,
            require_special: false,
        };
        assert!(validate_password("abcd", &policy).is_ok());
    }
}
