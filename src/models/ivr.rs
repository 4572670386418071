use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IVR menu reachable under its own extension or bound to an inbound DID.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IvrMenu {
    pub id: i64,
    pub name: String,
    pub extension: String,
    /// Sound file played as the menu greeting.
    pub prompt: Option<String>,
    pub timeout_seconds: i32,
    /// How often invalid/timed-out input loops back to the greeting.
    pub retries: i32,
    pub timeout_destination: Option<String>,
    pub inbound_trunk_id: Option<i64>,
    pub inbound_did: Option<String>,
    pub enabled: bool,
    #[sqlx(skip)]
    #[serde(default)]
    pub options: Vec<IvrOption>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One digit branch of an IVR menu.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IvrOption {
    pub id: i64,
    pub menu_id: i64,
    pub digit: String,
    pub destination: String,
    pub position: i32,
}
