use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps a DID arriving on a trunk to an internal destination (extension,
/// ring group or IVR menu). A DID resolves to exactly one destination.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InboundRoute {
    pub id: i64,
    /// E.164, e.g. "+4922166980".
    pub did: String,
    pub trunk_id: i64,
    pub destination_extension: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
