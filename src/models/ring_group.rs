use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ring strategies supported by the queue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingStrategy {
    RingAll,
    RoundRobin,
    LeastRecent,
}

impl RingStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringall" => Some(RingStrategy::RingAll),
            "roundrobin" => Some(RingStrategy::RoundRobin),
            "leastrecent" => Some(RingStrategy::LeastRecent),
            _ => None,
        }
    }

    /// Strategy keyword in queues.conf.
    pub fn queue_keyword(&self) -> &'static str {
        match self {
            RingStrategy::RingAll => "ringall",
            RingStrategy::RoundRobin => "roundrobin",
            RingStrategy::LeastRecent => "leastrecent",
        }
    }
}

/// A group of extensions rung together under one dialable number, backed by
/// a queue on the switch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RingGroup {
    pub id: i64,
    pub name: String,
    pub extension: String,
    pub inbound_trunk_id: Option<i64>,
    pub inbound_did: Option<String>,
    pub strategy: String,
    pub ring_time: i32,
    pub enabled: bool,
    /// Member extensions, loaded from the membership table alongside the
    /// group row.
    #[sqlx(skip)]
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RingGroup {
    pub fn strategy(&self) -> Option<RingStrategy> {
        RingStrategy::parse(&self.strategy)
    }

    /// Queue name in queues.conf, referenced from the dialplan.
    pub fn queue_name(&self) -> String {
        format!("rg_{}", self.id)
    }
}
