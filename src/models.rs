use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// A single chat message as delivered by the push channel and the mutation endpoints.
///
/// `message_id` is stable across edits and deletes. A deleted message keeps its
/// slot in the log and is shown as a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    #[serde(default)]
    pub room_id: String,
    pub sender_user_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl ChatMessage {
    /// Text to display for this message. Tombstones never expose their content.
    pub fn display_content(&self) -> &str {
        if self.deleted {
            "Message deleted"
        } else {
            &self.content
        }
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_user_id == user_id
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are local date-times
/// from the backend and are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = raw.parse::<DateTime<FixedOffset>>() {
        return Some(at.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp '{}'", raw)))
}

/// Envelope every backend service wraps its payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiGeneralResponse<T> {
    pub status: u16,
    #[serde(default)]
    pub message: String,
    pub data: T,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

// Body of error responses; `data` is usually null there
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Tenant,
    Owner,
    Admin,
}

/// The authenticated user as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: Option<String>,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub status: String,
}
