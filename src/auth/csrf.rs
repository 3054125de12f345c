use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "insforge_csrf";
pub const REFRESH_COOKIE: &str = "refresh_token";

type HmacSha256 = Hmac<Sha256>;

/// Double-submit CSRF token derived deterministically from the refresh
/// token (section 4.2): `HMAC(csrf_key, refresh_token)`, base64url-encoded.
#[derive(Clone)]
pub struct CsrfManager {
    key: std::sync::Arc<[u8]>,
}

impl CsrfManager {
    pub fn new(key: &str) -> Self {
        Self {
            key: std::sync::Arc::from(key.as_bytes()),
        }
    }

    pub fn derive(&self, refresh_token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(refresh_token.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Verifies the double-submit pattern: header and cookie must both be
    /// present, equal to each other, and equal to the value derived from the
    /// refresh token actually present on the request.
    pub fn verify(
        &self,
        header_token: Option<&str>,
        cookie_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> bool {
        let (Some(header), Some(cookie), Some(refresh)) =
            (header_token, cookie_token, refresh_token)
        else {
            return false;
        };

        if header != cookie {
            return false;
        }

        let expected = self.derive(refresh);
        // Constant-time compare to avoid leaking the token via timing.
        constant_time_eq(header.as_bytes(), expected.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let t1 = mgr.derive("refresh-abc");
        let t2 = mgr.derive("refresh-abc");
        assert_eq!(t1, t2);
    }

    #[test]
    fn derive_differs_per_refresh_token() {
        let mgr = CsrfManager::new("csrf-secret-key");
        assert_ne!(mgr.derive("refresh-abc"), mgr.derive("refresh-xyz"));
    }

    #[test]
    fn verify_succeeds_when_header_cookie_and_refresh_agree() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let csrf = mgr.derive("refresh-abc");
        assert!(mgr.verify(Some(&csrf), Some(&csrf), Some("refresh-abc")));
    }

    #[test]
    fn verify_fails_when_header_and_cookie_differ() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let csrf = mgr.derive("refresh-abc");
        assert!(!mgr.verify(Some(&csrf), Some("tampered"), Some("refresh-abc")));
    }

    #[test]
    fn verify_fails_when_refresh_token_missing() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let csrf = mgr.derive("refresh-abc");
        assert!(!mgr.verify(Some(&csrf), Some(&csrf), None));
    }

    #[test]
    fn verify_fails_when_header_missing() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let csrf = mgr.derive("refresh-abc");
        assert!(!mgr.verify(None, Some(&csrf), Some("refresh-abc")));
    }

    #[test]
    fn verify_fails_against_wrong_refresh_token() {
        let mgr = CsrfManager::new("csrf-secret-key");
        let csrf = mgr.derive("refresh-abc");
        assert!(!mgr.verify(Some(&csrf), Some(&csrf), Some("refresh-other")));
    }
}
