use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call detail record written when a tracked call reaches its terminal
/// hangup. Column names follow the classic Asterisk CDR layout so external
/// reporting tools keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdrRecord {
    pub call_date: DateTime<Utc>,
    /// `"Name" <number>` caller id string.
    pub clid: String,
    pub src: String,
    pub dst: String,
    pub dcontext: String,
    pub channel: String,
    pub dstchannel: String,
    pub lastapp: String,
    pub lastdata: String,
    /// Total seconds from dial to hangup.
    pub duration: i32,
    /// Seconds from answer to hangup; zero for unanswered calls.
    pub billsec: i32,
    pub disposition: String,
    pub amaflags: i32,
    pub uniqueid: String,
    pub userfield: String,
}
