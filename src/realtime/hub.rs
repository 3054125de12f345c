use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::auth::token::Role;
use crate::error::AppResult;
use crate::models::SenderType;
use crate::realtime::events::{EnvelopeMeta, ErrorCode, RealtimeEvent};

/// A single live WebSocket connection registered with the hub.
struct Connection {
    tx: mpsc::UnboundedSender<String>,
    role: Role,
    user_id: Option<Uuid>,
    rooms: HashSet<String>,
}

/// Per-connection registry + named-room membership (section 4.9). Cloning a
/// `Hub` is cheap — every clone shares the same underlying maps
/// (`Arc<RwLock<HashMap<...>>>`).
#[derive(Clone)]
pub struct Hub {
    pool: PgPool,
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    rooms: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
}

fn room_name(channel: &str) -> String {
    format!("realtime:{channel}")
}

impl Hub {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new connection and returns the id callers use for every
    /// later operation (subscribe/publish/unregister).
    pub async fn register(
        &self,
        role: Role,
        user_id: Option<Uuid>,
        tx: mpsc::UnboundedSender<String>,
    ) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.connections.write().await.insert(
            conn_id,
            Connection {
                tx,
                role,
                user_id,
                rooms: HashSet::new(),
            },
        );
        conn_id
    }

    /// Removes a connection from every room it joined, then drops it.
    pub async fn unregister(&self, conn_id: Uuid) {
        let rooms = {
            let mut connections = self.connections.write().await;
            connections.remove(&conn_id).map(|c| c.rooms)
        };
        let Some(rooms) = rooms else { return };
        let mut room_map = self.rooms.write().await;
        for room in rooms {
            if let Some(members) = room_map.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    room_map.remove(&room);
                }
            }
        }
    }

    /// Joins `channel` if the connection's role is authorized against the
    /// channel's registered pattern, run under that role's RLS identity
    /// (section 4.9 — "subscribe is RLS-gated").
    pub async fn subscribe(&self, conn_id: Uuid, channel: &str) -> AppResult<Result<(), ErrorCode>> {
        let (role, user_id) = {
            let connections = self.connections.read().await;
            let Some(conn) = connections.get(&conn_id) else {
                return Ok(Err(ErrorCode::InternalError));
            };
            (conn.role, conn.user_id)
        };

        if !self.channel_authorized(role, user_id, channel).await? {
            return Ok(Err(ErrorCode::Unauthorized));
        }

        let room = room_name(channel);
        {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(&conn_id) {
                conn.rooms.insert(room.clone());
            }
        }
        self.rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
        Ok(Ok(()))
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, channel: &str) {
        let room = room_name(channel);
        {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(&conn_id) {
                conn.rooms.remove(&room);
            }
        }
        let mut room_map = self.rooms.write().await;
        if let Some(members) = room_map.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                room_map.remove(&room);
            }
        }
    }

    /// Inserts a user-authored message under the publishing connection's RLS
    /// identity. The row's own trigger fires `NOTIFY realtime_message`, which
    /// the dispatcher (C10) later picks up — this call does not broadcast
    /// anything itself.
    pub async fn publish(
        &self,
        conn_id: Uuid,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> AppResult<Result<Uuid, ErrorCode>> {
        let (role, user_id, subscribed) = {
            let connections = self.connections.read().await;
            let Some(conn) = connections.get(&conn_id) else {
                return Ok(Err(ErrorCode::InternalError));
            };
            (conn.role, conn.user_id, conn.rooms.contains(&room_name(channel)))
        };

        if !subscribed {
            return Ok(Err(ErrorCode::NotSubscribed));
        }

        let mut tx = self.pool.begin().await?;
        set_session(&mut tx, role, user_id).await?;
        let row: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO realtime.messages (channel_id, channel_name, event_name, payload, sender_type, sender_id)
             SELECT id, $1, $2, $3, 'user', $4 FROM realtime.channels WHERE $1 LIKE pattern AND enabled LIMIT 1
             RETURNING id",
        )
        .bind(channel)
        .bind(event)
        .bind(&payload)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match row {
            Some((id,)) => Ok(Ok(id)),
            None => Ok(Err(ErrorCode::Unauthorized)),
        }
    }

    /// Delivers `event`/`payload` to every connection currently in `channel`'s
    /// room, wrapped in the server-controlled envelope. Connections whose
    /// send channel has already closed are silently skipped.
    pub async fn broadcast_to_room(
        &self,
        channel: &str,
        message_id: Uuid,
        event: &str,
        payload: serde_json::Value,
        sender_type: SenderType,
        sender_id: Option<Uuid>,
    ) -> usize {
        let room = room_name(channel);
        let envelope = RealtimeEvent {
            event: event.to_string(),
            payload,
            meta: EnvelopeMeta {
                channel: channel.to_string(),
                message_id,
                sender_type,
                sender_id,
                timestamp: Utc::now(),
            },
        };
        let Ok(text) = serde_json::to_string(&envelope) else {
            return 0;
        };

        let members = {
            let room_map = self.rooms.read().await;
            room_map.get(&room).cloned().unwrap_or_default()
        };
        if members.is_empty() {
            return 0;
        }

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for conn_id in &members {
            if let Some(conn) = connections.get(conn_id) {
                if conn.tx.send(text.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Sends a one-off frame to a single connection (acks, error frames) —
    /// never broadcast, never counted as room delivery.
    pub async fn send_to(&self, conn_id: Uuid, text: String) {
        if let Some(conn) = self.connections.read().await.get(&conn_id) {
            let _ = conn.tx.send(text);
        }
    }

    pub async fn get_room_size(&self, channel: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(&room_name(channel))
            .map(HashSet::len)
            .unwrap_or(0)
    }

    async fn channel_authorized(
        &self,
        role: Role,
        user_id: Option<Uuid>,
        channel: &str,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        set_session(&mut tx, role, user_id).await?;
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM realtime.channels WHERE $1 LIKE pattern AND enabled LIMIT 1",
        )
        .bind(channel)
        .fetch_optional(&mut *tx)
        .await?;
        // Read-only check — nothing to persist either way.
        let _ = tx.rollback().await;
        Ok(row.is_some())
    }
}

async fn set_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    role: Role,
    user_id: Option<Uuid>,
) -> AppResult<()> {
    sqlx::query("SELECT set_config('request.jwt.claim.sub', $1, true)")
        .bind(user_id.map(|u| u.to_string()).unwrap_or_default())
        .execute(&mut **tx)
        .await?;
    let set_role = format!("SET LOCAL ROLE {role}");
    sqlx::query(&set_role).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_is_namespaced() {
        assert_eq!(room_name("orders"), "realtime:orders");
    }

    #[test]
    fn role_display_matches_fixed_postgres_role_names() {
        assert_eq!(Role::Authenticated.to_string(), "authenticated");
        assert_eq!(Role::ProjectAdmin.to_string(), "project_admin");
        assert_eq!(Role::Anon.to_string(), "anon");
    }
}
