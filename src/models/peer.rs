use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal extension registered against the switch (a PJSIP endpoint).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SipPeer {
    pub id: i64,
    pub extension: String,
    /// Authentication secret. Rendered verbatim into the auth section,
    /// never written to logs or API responses.
    #[serde(skip_serializing)]
    pub secret: String,
    pub caller_id: Option<String>,
    pub context: String,
    /// Which owned DID is presented as caller id on outbound calls.
    pub outbound_cid: Option<String>,
    pub blf_enabled: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SipPeer {
    pub fn display_name(&self) -> &str {
        self.caller_id.as_deref().unwrap_or(&self.extension)
    }
}
