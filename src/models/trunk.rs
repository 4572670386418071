use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SIP servers for the known provider profiles. Any other provider value is
/// treated as custom and must carry its own `sip_server`.
pub const PROVIDER_SERVERS: &[(&str, &str)] = &[
    ("plusnet_basic", "sip.ipfonie.de"),
    ("plusnet_connect", "sipconnect.ipfonie.de"),
];

/// Resolve a provider profile name to its SIP server, if it is a known one.
pub fn provider_server(provider: &str) -> Option<&'static str> {
    PROVIDER_SERVERS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, server)| *server)
}

/// How a trunk authenticates against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrunkAuthMode {
    /// Outbound REGISTER with username/password.
    Registration,
    /// The provider identifies us by source IP; no registration.
    Ip,
}

impl TrunkAuthMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(TrunkAuthMode::Registration),
            "ip" => Some(TrunkAuthMode::Ip),
            _ => None,
        }
    }
}

/// External SIP connection to a telephony provider.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SipTrunk {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub auth_mode: String,
    pub sip_server: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub caller_id: Option<String>,
    pub number_block: Option<String>,
    pub context: String,
    pub codecs: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SipTrunk {
    pub fn auth_mode(&self) -> Option<TrunkAuthMode> {
        TrunkAuthMode::parse(&self.auth_mode)
    }

    /// SIP server for this trunk: the stored value, or the provider
    /// profile's default when the row predates explicit servers.
    pub fn resolved_server(&self) -> Option<&str> {
        if !self.sip_server.is_empty() {
            return Some(&self.sip_server);
        }
        provider_server(&self.provider)
    }

    /// Section names inside pjsip.conf. The dialplan dials
    /// `PJSIP/{number}@trunk-ep-{id}`, so these must stay in sync with the
    /// dialplan renderer.
    pub fn endpoint_section(&self) -> String {
        format!("trunk-ep-{}", self.id)
    }

    pub fn auth_section(&self) -> String {
        format!("trunk-auth-{}", self.id)
    }

    pub fn aor_section(&self) -> String {
        format!("trunk-aor-{}", self.id)
    }

    pub fn registration_section(&self) -> String {
        format!("trunk-reg-{}", self.id)
    }

    pub fn identify_section(&self) -> String {
        format!("trunk-id-{}", self.id)
    }

    /// Key under which Registry events for this trunk are tracked. Asterisk
    /// reports outbound registrations by domain/username, not by our id.
    pub fn registry_key(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.sip_server)
    }
}
