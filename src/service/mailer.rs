use async_trait::async_trait;

/// Outbound email collaborator. Transport is out of scope (section 5's
/// resolved Open Question); the only shipped implementation logs and
/// returns `Ok`, so the auth service's control flow around verification and
/// reset emails is fully exercised without a real mail provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(&self, email: &str, code: &str);
    async fn send_verification_link(&self, email: &str, token: &str);
    async fn send_reset_code(&self, email: &str, code: &str);
    async fn send_reset_link(&self, email: &str, token: &str);
}

pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_verification_code(&self, email: &str, code: &str) {
        tracing::info!(email, code, "verification code (no mail transport configured)");
    }

    async fn send_verification_link(&self, email: &str, token: &str) {
        tracing::info!(email, token, "verification link (no mail transport configured)");
    }

    async fn send_reset_code(&self, email: &str, code: &str) {
        tracing::info!(email, code, "password reset code (no mail transport configured)");
    }

    async fn send_reset_link(&self, email: &str, token: &str) {
        tracing::info!(email, token, "password reset link (no mail transport configured)");
    }
}
