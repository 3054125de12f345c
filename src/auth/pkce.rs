use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::models::AccountDto;

const CODE_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    access_token: String,
    user: AccountDto,
    code_challenge: Option<String>,
    expires_at: Instant,
}

/// In-memory, one-shot authorization-code store (section 4.3).
///
/// Mutex-guarded map keyed by an opaque random string; a lazy sweep runs on
/// every insert (section 9), in addition to whatever periodic sweeper the
/// caller wires up with [`PkceStore::sweep`].
#[derive(Clone)]
pub struct PkceStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl PkceStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stores a fresh authorization code and returns it.
    pub async fn store(
        &self,
        access_token: String,
        user: AccountDto,
        code_challenge: Option<String>,
    ) -> String {
        let code = random_code();
        let entry = Entry {
            access_token,
            user,
            code_challenge,
            expires_at: Instant::now() + CODE_TTL,
        };

        let mut guard = self.entries.write().await;
        guard.insert(code.clone(), entry);
        sweep_locked(&mut guard);
        code
    }

    /// Atomically removes and returns the entry for `code`, or `None` if it
    /// was never issued, already consumed, or has expired. This makes the
    /// store one-shot: a second call for the same code always returns `None`.
    pub async fn consume(&self, code: &str) -> Option<(String, AccountDto, Option<String>)> {
        let mut guard = self.entries.write().await;
        let entry = guard.remove(code)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some((entry.access_token, entry.user, entry.code_challenge))
    }

    /// Periodic sweep, intended to be driven by a background timer.
    pub async fn sweep(&self) {
        let mut guard = self.entries.write().await;
        sweep_locked(&mut guard);
    }
}

impl Default for PkceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_locked(map: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    map.retain(|_, entry| entry.expires_at >= now);
}

fn random_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE S256 verification: `base64url(sha256(verifier)) == challenge`.
pub fn verify_pkce(verifier: &str, challenge: &str) -> bool {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest) == challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_user() -> AccountDto {
        AccountDto {
            id: uuid::Uuid::new_v4(),
            email: "a@b.c".into(),
            name: None,
            email_verified: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn consume_returns_stored_entry_once() {
        let store = PkceStore::new();
        let code = store
            .store("token123".into(), dummy_user(), Some("challenge".into()))
            .await;

        let first = store.consume(&code).await;
        assert!(first.is_some());
        assert_eq!(first.unwrap().0, "token123");

        let second = store.consume(&code).await;
        assert!(second.is_none(), "code must be one-shot");
    }

    #[tokio::test]
    async fn consume_unknown_code_returns_none() {
        let store = PkceStore::new();
        assert!(store.consume("never-issued").await.is_none());
    }

    #[test]
    fn verify_pkce_accepts_matching_verifier() {
        let verifier = "a-random-code-verifier-value-1234567890";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        assert!(verify_pkce(verifier, &challenge));
    }

    #[test]
    fn verify_pkce_rejects_mismatched_verifier() {
        assert!(!verify_pkce("verifier-a", "not-the-right-challenge"));
    }

    #[tokio::test]
    async fn store_is_cheaply_cloneable_and_shares_state() {
        let store = PkceStore::new();
        let clone = store.clone();
        let code = store
            .store("tok".into(), dummy_user(), None)
            .await;
        assert!(clone.consume(&code).await.is_some());
    }
}
