use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Account
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountDto {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountDto {
    fn from(a: Account) -> Self {
        AccountDto {
            id: a.id,
            email: a.email,
            name: a.name,
            email_verified: a.email_verified,
            created_at: a.created_at,
        }
    }
}

// ============================================================================
// AccountProvider (OAuth linkage)
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccountProvider {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub identity_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Realtime: Channel / Message
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Channel {
    pub id: Uuid,
    pub pattern: String,
    pub webhook_urls: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    System,
    User,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub channel_name: String,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub sender_type: String,
    pub sender_id: Option<Uuid>,
    pub ws_audience_count: Option<i32>,
    pub wh_audience_count: Option<i32>,
    pub wh_delivered_count: Option<i32>,
}

// ============================================================================
// ChangeSetItem — emitted by the SQL safety gate (C8)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChangeSetItem {
    pub tag: ChangeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTag {
    Tables,
    Table,
    Records,
    Index,
    Trigger,
    Policy,
    Function,
    Extension,
}
