use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardType {
    Unconditional,
    Busy,
    NoAnswer,
}

impl ForwardType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconditional" => Some(ForwardType::Unconditional),
            "busy" => Some(ForwardType::Busy),
            "no_answer" => Some(ForwardType::NoAnswer),
            _ => None,
        }
    }
}

/// Call forwarding rule. At most one active rule per (extension, type);
/// the snapshot validator enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CallForward {
    pub id: i64,
    pub extension: String,
    pub forward_type: String,
    pub destination: String,
    /// Seconds the extension rings before a no-answer forward kicks in.
    pub ring_time: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallForward {
    pub fn forward_type(&self) -> Option<ForwardType> {
        ForwardType::parse(&self.forward_type)
    }
}
