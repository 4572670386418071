use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Voicemail mailbox for one extension.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailBox {
    pub id: i64,
    pub extension: String,
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub pin: String,
    pub name: Option<String>,
    /// Notification address written into voicemail.conf; delivery itself is
    /// the switch's job.
    pub email: Option<String>,
    /// Seconds the extension rings before the call diverts to voicemail.
    pub ring_timeout: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
