use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Channel, Message, SenderType};
use crate::realtime::hub::Hub;
use crate::realtime::webhook::WebhookSender;

const NOTIFY_CHANNEL: &str = "realtime_message";
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const RECONNECT_BASE: Duration = Duration::from_secs(5);

/// Listens on Postgres's `realtime_message` channel and fans each newly
/// inserted message out to the Socket Hub (C9) and Webhook Sender (C11),
/// then writes the delivery counters back onto the row (section 4.10).
pub struct Dispatcher {
    pool: PgPool,
    database_url: String,
    hub: Hub,
    webhook: WebhookSender,
}

impl Dispatcher {
    pub fn new(pool: PgPool, database_url: String, hub: Hub, webhook: WebhookSender) -> Self {
        Self {
            pool,
            database_url,
            hub,
            webhook,
        }
    }

    /// Runs forever, reconnecting with exponential backoff on listener loss
    /// and giving up (logging, not panicking) after [`MAX_RECONNECT_ATTEMPTS`]
    /// consecutive failures.
    pub async fn run(self) {
        let mut attempt = 0u32;
        loop {
            match self.listen_once().await {
                Ok(()) => attempt = 0,
                Err(e) => {
                    tracing::warn!(error = ?e, attempt, "realtime listener disconnected");
                }
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                tracing::error!("realtime dispatcher exhausted reconnect attempts; giving up");
                return;
            }
            let backoff = RECONNECT_BASE * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn listen_once(&self) -> AppResult<()> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(AppError::from)?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .map_err(AppError::from)?;

        loop {
            let notification = listener.recv().await.map_err(AppError::from)?;
            let payload = notification.payload().to_string();
            if let Err(e) = self.handle_notification(&payload).await {
                // A single bad message must never take the listener down —
                // log and keep waiting for the next NOTIFY.
                tracing::warn!(error = ?e, payload, "failed to dispatch realtime notification");
            }
        }
    }

    async fn handle_notification(&self, payload: &str) -> AppResult<()> {
        let Ok(message_id) = payload.parse::<Uuid>() else {
            tracing::warn!(payload, "realtime notification payload was not a uuid");
            return Ok(());
        };

        let Some(message) = fetch_message(&self.pool, message_id).await? else {
            return Ok(());
        };
        let Some(channel) = fetch_channel(&self.pool, message.channel_id).await? else {
            return Ok(());
        };
        if !channel.enabled {
            return Ok(());
        }

        let sender_type = if message.sender_type == "user" {
            SenderType::User
        } else {
            SenderType::System
        };

        let ws_audience = self.hub.get_room_size(&message.channel_name).await;
        if ws_audience > 0 {
            self.hub
                .broadcast_to_room(
                    &message.channel_name,
                    message.id,
                    &message.event_name,
                    message.payload.clone(),
                    sender_type,
                    message.sender_id,
                )
                .await;
        }

        let wh_audience = channel.webhook_urls.len();
        let wh_delivered = if wh_audience > 0 {
            self.webhook
                .send_to_all(&channel.webhook_urls, &message)
                .await
                .iter()
                .filter(|r| r.success)
                .count()
        } else {
            0
        };

        update_delivery_counts(
            &self.pool,
            message_id,
            ws_audience as i32,
            wh_audience as i32,
            wh_delivered as i32,
        )
        .await
    }
}

async fn fetch_message(pool: &PgPool, id: Uuid) -> AppResult<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, channel_id, channel_name, event_name, payload, sender_type, sender_id,
                ws_audience_count, wh_audience_count, wh_delivered_count
         FROM realtime.messages WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(message)
}

async fn fetch_channel(pool: &PgPool, id: Uuid) -> AppResult<Option<Channel>> {
    let channel = sqlx::query_as::<_, Channel>(
        "SELECT id, pattern, webhook_urls, enabled FROM realtime.channels WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(channel)
}

async fn update_delivery_counts(
    pool: &PgPool,
    message_id: Uuid,
    ws_audience_count: i32,
    wh_audience_count: i32,
    wh_delivered_count: i32,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE realtime.messages
         SET ws_audience_count = $2, wh_audience_count = $3, wh_delivered_count = $4
         WHERE id = $1",
    )
    .bind(message_id)
    .bind(ws_audience_count)
    .bind(wh_audience_count)
    .bind(wh_delivered_count)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_doubles_each_attempt() {
        let b1 = RECONNECT_BASE * 2u32.saturating_pow(0);
        let b2 = RECONNECT_BASE * 2u32.saturating_pow(1);
        let b3 = RECONNECT_BASE * 2u32.saturating_pow(2);
        assert_eq!(b1, Duration::from_secs(5));
        assert_eq!(b2, Duration::from_secs(10));
        assert_eq!(b3, Duration::from_secs(20));
    }
}
