use std::time::Duration;

use futures::future::join_all;

use crate::models::Message;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WebhookResult {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// Parallel, per-URL webhook delivery (section 4.11). Every URL is attempted
/// independently and concurrently — one slow or dead endpoint never delays
/// delivery to the others.
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build webhook HTTP client");
        Self { client }
    }

    pub async fn send_to_all(&self, urls: &[String], message: &Message) -> Vec<WebhookResult> {
        let futures = urls.iter().map(|url| self.send_one(url, message));
        join_all(futures).await
    }

    /// Retries up to [`MAX_ATTEMPTS`] times, but only on network-level
    /// failure. Any HTTP response at all — even a 4xx/5xx — is terminal:
    /// the endpoint answered, so retrying wouldn't change anything section
    /// 4.11 expects us to fix by itself.
    async fn send_one(&self, url: &str, message: &Message) -> WebhookResult {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header("X-InsForge-Event", &message.event_name)
                .header("X-InsForge-Channel", &message.channel_name)
                .header("X-InsForge-Message-Id", message.id.to_string())
                .json(&message.payload)
                .send()
                .await;

            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    return WebhookResult {
                        url: url.to_string(),
                        success: status.is_success(),
                        status_code: Some(status.as_u16()),
                        error: None,
                    };
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return WebhookResult {
                            url: url.to_string(),
                            success: false,
                            status_code: None,
                            error: Some(e.to_string()),
                        };
                    }
                    tokio::time::sleep(RETRY_BASE * attempt).await;
                }
            }
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_all_returns_one_result_per_url_even_with_no_urls() {
        let sender = WebhookSender::new();
        let message = Message {
            id: uuid::Uuid::new_v4(),
            channel_id: uuid::Uuid::new_v4(),
            channel_name: "orders".into(),
            event_name: "created".into(),
            payload: serde_json::json!({}),
            sender_type: "system".into(),
            sender_id: None,
            ws_audience_count: None,
            wh_audience_count: None,
            wh_delivered_count: None,
        };
        let results = sender.send_to_all(&[], &message).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_is_reported_as_a_failure_not_a_panic() {
        let sender = WebhookSender::new();
        let message = Message {
            id: uuid::Uuid::new_v4(),
            channel_id: uuid::Uuid::new_v4(),
            channel_name: "orders".into(),
            event_name: "created".into(),
            payload: serde_json::json!({"ok": true}),
            sender_type: "system".into(),
            sender_id: None,
            ws_audience_count: None,
            wh_audience_count: None,
            wh_delivered_count: None,
        };
        let results = sender
            .send_to_all(&["http://127.0.0.1:1".to_string()], &message)
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.is_some());
    }
}
