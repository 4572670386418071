//! Derived live state streamed to admin sessions.
//!
//! Everything in this module is rebuilt from the switch's event stream and is
//! authoritative only between switch restarts. The state aggregator is the
//! sole writer; everyone else sees point-in-time copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of the manager-protocol link, as maintained by the reconnect
/// supervisor. `Degraded` is a standing status, not a one-shot error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LinkStatus {
    Connecting,
    Connected,
    Degraded { attempts: u32 },
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Registered,
    Unregistered,
}

/// Registration state of one internal extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEndpoint {
    pub extension: String,
    pub status: EndpointStatus,
    pub contact_uri: Option<String>,
    /// Qualify round-trip time in milliseconds.
    pub rtt_ms: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Ringing,
    Up,
    Hungup,
}

/// One active (or just-hung-up) call, keyed by the switch's Linkedid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChannel {
    pub id: String,
    pub channel: String,
    pub dest_channel: String,
    pub caller: String,
    pub caller_name: String,
    pub destination: String,
    pub dest_name: String,
    pub state: ChannelState,
    /// Last DialStatus reported by the switch (`ANSWER`, `BUSY`, ...).
    pub dial_status: Option<String>,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrunkRegStatus {
    Pending,
    Registered,
    Failed,
}

/// Outbound registration state of one trunk, keyed the way the switch
/// reports it (registry username or domain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkRegistration {
    pub key: String,
    pub status: TrunkRegStatus,
    /// Last raw status line from the switch, for the GUI.
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time copy of the whole derived-state table, sent to every
/// session when it connects and after every resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub link: LinkStatus,
    pub endpoints: Vec<LiveEndpoint>,
    pub channels: Vec<LiveChannel>,
    pub trunks: Vec<TrunkRegistration>,
}

/// A single observed transition, fanned out to admin sessions. Emitted once
/// per real state change, never per raw event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StateChange {
    Link(LinkStatus),
    Endpoint(LiveEndpoint),
    Channel(LiveChannel),
    #[serde(rename_all = "camelCase")]
    ChannelRemoved { id: String },
    Trunk(TrunkRegistration),
    /// The table was rebuilt wholesale; sessions should replace their copy.
    Resync(LiveSnapshot),
}
