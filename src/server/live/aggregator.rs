//! Folds the switch's event stream into the derived-state table.
//!
//! The table is the only shared mutable structure in the core. It is owned
//! by this aggregator: the supervisor's event pump is the single logical
//! writer, readers take point-in-time copies via `snapshot`. Every
//! transition is idempotent — replayed or restating events change nothing
//! and emit nothing — and events for unknown ids create their entity lazily,
//! because the switch, not our bookkeeping, is the source of truth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{watch, RwLock};

use crate::models::{
    CdrRecord, ChannelState, EndpointStatus, LinkStatus, LiveChannel, LiveEndpoint,
    LiveSnapshot, StateChange, TrunkRegStatus, TrunkRegistration,
};
use crate::server::ami::protocol::{AmiAction, AmiEvent};
use crate::server::ami::{AmiError, AmiHandle};
use crate::server::db;

use super::events::SwitchEvent;
use super::hub::BroadcastHub;

/// How long a hung-up call stays visible so the GUI can render its final
/// status line before the entry disappears.
pub const CHANNEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct LiveTable {
    endpoints: HashMap<String, LiveEndpoint>,
    channels: HashMap<String, LiveChannel>,
    trunks: HashMap<String, TrunkRegistration>,
}

pub struct StateAggregator {
    table: Arc<RwLock<LiveTable>>,
    hub: Arc<BroadcastHub>,
    /// CDR sink; absent in tests.
    db: Option<PgPool>,
    link: watch::Receiver<LinkStatus>,
    grace: Duration,
}

impl StateAggregator {
    pub fn new(
        hub: Arc<BroadcastHub>,
        db: Option<PgPool>,
        link: watch::Receiver<LinkStatus>,
        grace: Duration,
    ) -> Self {
        Self {
            table: Arc::new(RwLock::new(LiveTable::default())),
            hub,
            db,
            link,
            grace,
        }
    }

    /// Point-in-time copy of the whole table, sorted for stable output.
    pub async fn snapshot(&self) -> LiveSnapshot {
        let table = self.table.read().await;

        let mut endpoints: Vec<_> = table.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.extension.cmp(&b.extension));
        let mut channels: Vec<_> = table.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        let mut trunks: Vec<_> = table.trunks.values().cloned().collect();
        trunks.sort_by(|a, b| a.key.cmp(&b.key));

        LiveSnapshot {
            link: self.link.borrow().clone(),
            endpoints,
            channels,
            trunks,
        }
    }

    /// Apply one event from the switch. Raw events are forwarded to
    /// subscribers unconditionally; a state-change notification goes out
    /// only when the table actually changed.
    pub async fn apply(&self, raw: AmiEvent) {
        let event = SwitchEvent::from_ami(&raw);
        self.hub.publish_event(raw).await;

        match event {
            SwitchEvent::ContactStatus {
                extension,
                reachable,
                uri,
                rtt_ms,
            } => {
                if extension.is_empty() {
                    return;
                }
                self.apply_endpoint(extension, reachable, uri, rtt_ms).await;
            }
            SwitchEvent::PeerStatus {
                extension,
                reachable,
            } => {
                if extension.is_empty() {
                    return;
                }
                self.apply_endpoint(extension, Some(reachable), None, None)
                    .await;
            }
            SwitchEvent::Registry {
                key,
                registered,
                status,
            } => {
                if key.is_empty() {
                    return;
                }
                self.apply_registry(key, registered, status).await;
            }
            SwitchEvent::DialBegin {
                linked_id,
                channel,
                dest_channel,
                caller,
                caller_name,
                destination,
                dest_name,
            } => {
                if linked_id.is_empty() {
                    return;
                }
                self.apply_dial_begin(
                    linked_id,
                    channel,
                    dest_channel,
                    caller,
                    caller_name,
                    destination,
                    dest_name,
                )
                .await;
            }
            SwitchEvent::DialEnd {
                linked_id,
                dial_status,
            } => {
                if linked_id.is_empty() {
                    return;
                }
                self.apply_dial_end(linked_id, dial_status).await;
            }
            SwitchEvent::Hangup { linked_id } => {
                if linked_id.is_empty() {
                    return;
                }
                self.apply_hangup(linked_id).await;
            }
            SwitchEvent::Unrecognized { name } => {
                tracing::trace!(event = %name, "unmodeled switch event");
            }
        }
    }

    async fn apply_endpoint(
        &self,
        extension: String,
        reachable: Option<bool>,
        uri: Option<String>,
        rtt_ms: Option<f64>,
    ) {
        let now = Utc::now();
        let mut table = self.table.write().await;

        let entry = table
            .endpoints
            .entry(extension.clone())
            .or_insert_with(|| LiveEndpoint {
                extension,
                status: EndpointStatus::Unregistered,
                contact_uri: None,
                rtt_ms: None,
                last_seen: now,
            });

        let previous = entry.status;
        if let Some(reachable) = reachable {
            entry.status = if reachable {
                EndpointStatus::Registered
            } else {
                EndpointStatus::Unregistered
            };
        }
        if uri.is_some() {
            entry.contact_uri = uri;
        }
        if rtt_ms.is_some() {
            entry.rtt_ms = rtt_ms;
        }
        entry.last_seen = now;

        if entry.status != previous {
            let changed = entry.clone();
            drop(table);
            self.hub.publish_state(StateChange::Endpoint(changed)).await;
        }
    }

    async fn apply_registry(&self, key: String, registered: bool, status: String) {
        let now = Utc::now();
        let next = if registered {
            TrunkRegStatus::Registered
        } else {
            TrunkRegStatus::Failed
        };

        let mut table = self.table.write().await;
        let entry = table
            .trunks
            .entry(key.clone())
            .or_insert_with(|| TrunkRegistration {
                key,
                status: TrunkRegStatus::Pending,
                detail: None,
                updated_at: now,
            });

        let previous = entry.status;
        entry.status = next;
        entry.detail = Some(status);
        entry.updated_at = now;

        if entry.status != previous {
            let changed = entry.clone();
            drop(table);
            self.hub.publish_state(StateChange::Trunk(changed)).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_dial_begin(
        &self,
        linked_id: String,
        channel: String,
        dest_channel: String,
        caller: String,
        caller_name: String,
        destination: String,
        dest_name: String,
    ) {
        let mut table = self.table.write().await;
        if table.channels.contains_key(&linked_id) {
            // Replayed dial-start for a call we already track.
            return;
        }

        let entry = LiveChannel {
            id: linked_id.clone(),
            channel,
            dest_channel,
            caller,
            caller_name,
            destination,
            dest_name,
            state: ChannelState::Ringing,
            dial_status: None,
            start_time: Utc::now(),
            answer_time: None,
        };
        table.channels.insert(linked_id, entry.clone());
        drop(table);

        tracing::info!(
            caller = %entry.caller,
            destination = %entry.destination,
            id = %entry.id,
            "call started"
        );
        self.hub.publish_state(StateChange::Channel(entry)).await;
    }

    async fn apply_dial_end(&self, linked_id: String, dial_status: String) {
        let mut table = self.table.write().await;

        // Unknown id: the call predates us (or we missed DialBegin); track it
        // from here instead of rejecting the event.
        let entry = table
            .channels
            .entry(linked_id.clone())
            .or_insert_with(|| LiveChannel {
                id: linked_id,
                channel: String::new(),
                dest_channel: String::new(),
                caller: String::new(),
                caller_name: String::new(),
                destination: String::new(),
                dest_name: String::new(),
                state: ChannelState::Ringing,
                dial_status: None,
                start_time: Utc::now(),
                answer_time: None,
            });

        if entry.state == ChannelState::Hungup {
            return;
        }

        let answered = dial_status == "ANSWER";
        let previous = entry.state;
        entry.dial_status = Some(dial_status);
        if answered && entry.state == ChannelState::Ringing {
            entry.state = ChannelState::Up;
            entry.answer_time = Some(Utc::now());
        }

        if entry.state != previous {
            let changed = entry.clone();
            drop(table);
            tracing::info!(id = %changed.id, "call answered");
            self.hub.publish_state(StateChange::Channel(changed)).await;
        }
    }

    async fn apply_hangup(&self, linked_id: String) {
        let mut table = self.table.write().await;
        let Some(entry) = table.channels.get_mut(&linked_id) else {
            return;
        };
        if entry.state == ChannelState::Hungup {
            return;
        }

        let answered = entry.answer_time.is_some() || entry.state == ChannelState::Up;
        entry.state = ChannelState::Hungup;
        let finished = entry.clone();
        drop(table);

        tracing::info!(id = %finished.id, "call ended");

        if let Some(pool) = self.db.clone() {
            let record = cdr_for(&finished, answered);
            tokio::spawn(async move {
                if let Err(e) = db::cdr::insert(&pool, &record).await {
                    tracing::error!("failed to save CDR: {}", e);
                }
            });
        }

        self.hub
            .publish_state(StateChange::Channel(finished))
            .await;

        // Keep the terminal entry around briefly so clients can render the
        // final status line, then purge it.
        let table = self.table.clone();
        let hub = self.hub.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let mut table = table.write().await;
            let hung_up = table
                .channels
                .get(&linked_id)
                .map(|c| c.state == ChannelState::Hungup)
                .unwrap_or(false);
            if !hung_up {
                return;
            }
            table.channels.remove(&linked_id);
            drop(table);

            hub.publish_state(StateChange::ChannelRemoved { id: linked_id })
                .await;
        });
    }

    /// Discard everything and rebuild from the switch's own enumeration.
    /// Called by the supervisor after every reconnect, before event delivery
    /// resumes, which bounds staleness after an outage to one round-trip.
    pub async fn resync(&self, ami: &AmiHandle) -> Result<(), AmiError> {
        let (_, endpoint_list) = ami
            .execute_list(AmiAction::new("PJSIPShowEndpoints"))
            .await?;
        let (_, contact_list) = ami.execute_list(AmiAction::new("PJSIPShowContacts")).await?;
        let (_, registration_list) = ami
            .execute_list(AmiAction::new("PJSIPShowRegistrationsOutbound"))
            .await?;
        let (_, channel_list) = ami.execute_list(AmiAction::new("CoreShowChannels")).await?;

        let fresh = build_table(&endpoint_list, &contact_list, &registration_list, &channel_list);

        {
            let mut table = self.table.write().await;
            *table = fresh;
        }

        let snapshot = self.snapshot().await;
        tracing::info!(
            endpoints = snapshot.endpoints.len(),
            channels = snapshot.channels.len(),
            trunks = snapshot.trunks.len(),
            "live state resynchronized"
        );
        self.hub
            .publish_state(StateChange::Resync(snapshot))
            .await;

        Ok(())
    }

    /// Active (non-terminal) calls, for the HTTP surface.
    pub async fn active_channels(&self) -> Vec<LiveChannel> {
        let snapshot = self.snapshot().await;
        snapshot
            .channels
            .into_iter()
            .filter(|c| c.state != ChannelState::Hungup)
            .collect()
    }
}

/// Build a fresh table from the switch's enumeration answers. Pure, so the
/// resync mapping is testable without a live connection.
fn build_table(
    endpoint_list: &[AmiEvent],
    contact_list: &[AmiEvent],
    registration_list: &[AmiEvent],
    channel_list: &[AmiEvent],
) -> LiveTable {
    let mut fresh = LiveTable::default();
    let now = Utc::now();

    for ev in endpoint_list.iter().filter(|e| e.name == "EndpointList") {
        let Some(name) = ev.get("ObjectName").filter(|n| !n.is_empty()) else {
            continue;
        };
        let device_state = ev.get("DeviceState").unwrap_or_default();
        let status = match device_state {
            "Unavailable" | "Invalid" | "Unknown" => EndpointStatus::Unregistered,
            _ => EndpointStatus::Registered,
        };
        fresh.endpoints.insert(
            name.to_string(),
            LiveEndpoint {
                extension: name.to_string(),
                status,
                contact_uri: None,
                rtt_ms: None,
                last_seen: now,
            },
        );
    }

    for ev in contact_list.iter().filter(|e| e.name == "ContactList") {
        let Some(name) = contact_endpoint(ev) else { continue };
        if let Some(entry) = fresh.endpoints.get_mut(&name) {
            entry.contact_uri = ev.get("Uri").map(|s| s.to_string());
            entry.rtt_ms = ev
                .get("RoundtripUsec")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|usec| usec / 1000.0);
        }
    }

    for ev in registration_list
        .iter()
        .filter(|e| e.name == "OutboundRegistrationDetail")
    {
        let key = ev
            .get("ClientUri")
            .and_then(registry_user)
            .or_else(|| ev.get("ObjectName").map(|s| s.to_string()));
        let Some(key) = key else { continue };
        let status = match ev.get("Status").unwrap_or_default() {
            "Registered" => TrunkRegStatus::Registered,
            "Rejected" | "Failed" => TrunkRegStatus::Failed,
            _ => TrunkRegStatus::Pending,
        };
        fresh.trunks.insert(
            key.clone(),
            TrunkRegistration {
                key,
                status,
                detail: ev.get("Status").map(|s| s.to_string()),
                updated_at: now,
            },
        );
    }

    for ev in channel_list.iter().filter(|e| e.name == "CoreShowChannel") {
        let Some(linked_id) = ev.get("Linkedid").filter(|l| !l.is_empty()) else {
            continue;
        };
        let up = ev.get("ChannelStateDesc") == Some("Up");
        let started = now
            - chrono::Duration::seconds(
                ev.get("Duration").map(parse_duration_secs).unwrap_or(0),
            );

        let entry = fresh
            .channels
            .entry(linked_id.to_string())
            .or_insert_with(|| LiveChannel {
                id: linked_id.to_string(),
                channel: ev.get("Channel").unwrap_or_default().to_string(),
                dest_channel: String::new(),
                caller: ev.get("CallerIDnum").unwrap_or_default().to_string(),
                caller_name: ev.get("CallerIDname").unwrap_or_default().to_string(),
                destination: ev.get("ConnectedLineNum").unwrap_or_default().to_string(),
                dest_name: ev.get("ConnectedLineName").unwrap_or_default().to_string(),
                state: ChannelState::Ringing,
                dial_status: None,
                start_time: started,
                answer_time: None,
            });

        // Second leg of a call we already saw.
        if entry.dest_channel.is_empty()
            && entry.channel != ev.get("Channel").unwrap_or_default()
        {
            entry.dest_channel = ev.get("Channel").unwrap_or_default().to_string();
        }
        if up {
            entry.state = ChannelState::Up;
        }
        if started < entry.start_time {
            entry.start_time = started;
        }
    }

    fresh
}

/// `sip:user@domain` -> `user`; how the switch keys outbound registrations
/// in incremental Registry events.
fn registry_user(client_uri: &str) -> Option<String> {
    let rest = client_uri.strip_prefix("sip:").unwrap_or(client_uri);
    rest.split('@').next().map(|s| s.to_string()).filter(|s| !s.is_empty())
}

/// Contact list rows name their endpoint differently across switch
/// versions; try the explicit fields first, then the `aor;@hash` object
/// name.
fn contact_endpoint(ev: &AmiEvent) -> Option<String> {
    ev.get("Endpoint")
        .or(ev.get("EndpointName"))
        .or(ev.get("AOR"))
        .map(|s| s.to_string())
        .or_else(|| {
            ev.get("ObjectName")
                .and_then(|n| n.split(';').next())
                .map(|s| s.to_string())
        })
        .filter(|s| !s.is_empty())
}

/// `HH:MM:SS` -> seconds; zero on anything unparseable.
fn parse_duration_secs(text: &str) -> i64 {
    let mut parts = text.split(':').rev();
    let secs: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let mins: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let hours: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    hours * 3600 + mins * 60 + secs
}

fn cdr_for(channel: &LiveChannel, answered: bool) -> CdrRecord {
    let end = Utc::now();
    let duration = (end - channel.start_time).num_seconds().max(0) as i32;
    let billsec = channel
        .answer_time
        .map(|a| (end - a).num_seconds().max(0) as i32)
        .unwrap_or(0);

    let disposition = if answered {
        "ANSWERED".to_string()
    } else {
        match channel.dial_status.as_deref() {
            Some("BUSY") => "BUSY".to_string(),
            None | Some("") | Some("ANSWER") => "NO ANSWER".to_string(),
            Some(other) => other.to_string(),
        }
    };

    CdrRecord {
        call_date: channel.start_time,
        clid: format!("\"{}\" <{}>", channel.caller_name, channel.caller),
        src: channel.caller.clone(),
        dst: channel.destination.clone(),
        dcontext: "internal".to_string(),
        channel: channel.channel.clone(),
        dstchannel: channel.dest_channel.clone(),
        lastapp: "Dial".to_string(),
        lastdata: channel.destination.clone(),
        duration,
        billsec,
        disposition,
        amaflags: 3,
        uniqueid: channel.id.clone(),
        userfield: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn aggregator() -> (Arc<StateAggregator>, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new());
        // A dropped sender keeps `borrow` serving the last value.
        let (_link_tx, link_rx) = watch::channel(LinkStatus::Connected);
        let aggregator = Arc::new(StateAggregator::new(
            hub.clone(),
            None,
            link_rx,
            Duration::from_millis(50),
        ));
        (aggregator, hub)
    }

    fn event(name: &str, fields: &[(&str, &str)]) -> AmiEvent {
        AmiEvent {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    async fn state_changes(
        rx: &mut tokio::sync::mpsc::Receiver<super::super::hub::PushMessage>,
    ) -> Vec<StateChange> {
        let mut changes = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let super::super::hub::PushMessage::State(change) = msg {
                changes.push(change);
            }
        }
        changes
    }

    #[tokio::test]
    async fn test_contact_status_registers_endpoint() {
        let (aggregator, _hub) = aggregator();

        aggregator
            .apply(event(
                "ContactStatus",
                &[("EndpointName", "1001"), ("ContactStatus", "Reachable")],
            ))
            .await;

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(snapshot.endpoints[0].status, EndpointStatus::Registered);
    }

    #[tokio::test]
    async fn test_applying_same_event_twice_is_idempotent() {
        let (aggregator, _hub) = aggregator();

        let ev = event(
            "ContactStatus",
            &[("EndpointName", "1001"), ("ContactStatus", "Reachable")],
        );
        aggregator.apply(ev.clone()).await;
        let once = aggregator.snapshot().await;

        aggregator.apply(ev).await;
        let twice = aggregator.snapshot().await;

        assert_eq!(once.endpoints[0].status, twice.endpoints[0].status);
        assert_eq!(once.endpoints.len(), twice.endpoints.len());
        assert_eq!(once.channels, twice.channels);
        assert_eq!(once.trunks, twice.trunks);
    }

    #[tokio::test]
    async fn test_trunk_registry_transitions_emit_one_notification_each() {
        let (aggregator, hub) = aggregator();
        let (_id, mut rx) = hub.register().await;

        let registered = event(
            "Registry",
            &[
                ("ChannelDriver", "PJSIP"),
                ("Domain", "sip.ipfonie.de"),
                ("Status", "Registered"),
            ],
        );
        aggregator.apply(registered.clone()).await;
        // Restating event: table unchanged, no second notification.
        aggregator.apply(registered).await;
        aggregator
            .apply(event(
                "Registry",
                &[
                    ("ChannelDriver", "PJSIP"),
                    ("Domain", "sip.ipfonie.de"),
                    ("Status", "Rejected"),
                ],
            ))
            .await;

        let trunk_changes: Vec<_> = state_changes(&mut rx)
            .await
            .into_iter()
            .filter_map(|c| match c {
                StateChange::Trunk(t) => Some(t),
                _ => None,
            })
            .collect();

        assert_eq!(trunk_changes.len(), 2);
        assert_eq!(trunk_changes[0].status, TrunkRegStatus::Registered);
        assert_eq!(trunk_changes[1].status, TrunkRegStatus::Failed);

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.trunks[0].status, TrunkRegStatus::Failed);
    }

    #[tokio::test]
    async fn test_channel_lifecycle_ringing_up_purged() {
        let (aggregator, hub) = aggregator();
        let (_id, mut rx) = hub.register().await;

        aggregator
            .apply(event(
                "DialBegin",
                &[
                    ("Linkedid", "C-1"),
                    ("Channel", "PJSIP/1001-00000001"),
                    ("DestChannel", "PJSIP/1002-00000002"),
                    ("CallerIDNum", "1001"),
                    ("DestCallerIDNum", "1002"),
                ],
            ))
            .await;
        assert_eq!(
            aggregator.snapshot().await.channels[0].state,
            ChannelState::Ringing
        );

        aggregator
            .apply(event(
                "DialEnd",
                &[("Linkedid", "C-1"), ("DialStatus", "ANSWER")],
            ))
            .await;
        assert_eq!(
            aggregator.snapshot().await.channels[0].state,
            ChannelState::Up
        );

        aggregator
            .apply(event("Hangup", &[("Linkedid", "C-1")]))
            .await;
        assert_eq!(
            aggregator.snapshot().await.channels[0].state,
            ChannelState::Hungup
        );

        // After the grace window the entry is gone.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(aggregator.snapshot().await.channels.is_empty());

        // Transitions were observed in order, with no intermediate unknowns.
        let states: Vec<_> = state_changes(&mut rx)
            .await
            .into_iter()
            .filter_map(|c| match c {
                StateChange::Channel(ch) => Some(format!("{:?}", ch.state)),
                StateChange::ChannelRemoved { id } => Some(format!("Removed:{}", id)),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec!["Ringing", "Up", "Hungup", "Removed:C-1"]);
    }

    #[tokio::test]
    async fn test_duplicate_hangup_is_a_noop() {
        let (aggregator, hub) = aggregator();

        aggregator
            .apply(event(
                "DialBegin",
                &[("Linkedid", "C-2"), ("CallerIDNum", "1001")],
            ))
            .await;
        aggregator
            .apply(event("Hangup", &[("Linkedid", "C-2")]))
            .await;

        let (_id, mut rx) = hub.register().await;
        aggregator
            .apply(event("Hangup", &[("Linkedid", "C-2")]))
            .await;

        assert!(state_changes(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_dial_end_for_unknown_channel_creates_it_lazily() {
        let (aggregator, _hub) = aggregator();

        aggregator
            .apply(event(
                "DialEnd",
                &[("Linkedid", "C-9"), ("DialStatus", "ANSWER")],
            ))
            .await;

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(snapshot.channels[0].state, ChannelState::Up);
    }

    #[test]
    fn test_build_table_from_enumeration() {
        let endpoints = vec![
            event(
                "EndpointList",
                &[("ObjectName", "1001"), ("DeviceState", "Not in use")],
            ),
            event(
                "EndpointList",
                &[("ObjectName", "1002"), ("DeviceState", "Unavailable")],
            ),
        ];
        let contacts = vec![event(
            "ContactList",
            &[
                ("Endpoint", "1001"),
                ("Uri", "sip:1001@10.0.0.7:5060"),
                ("RoundtripUsec", "15000"),
            ],
        )];
        let registrations = vec![event(
            "OutboundRegistrationDetail",
            &[
                ("ObjectName", "trunk-reg-3"),
                ("ClientUri", "sip:user3@sip.ipfonie.de"),
                ("Status", "Registered"),
            ],
        )];
        let channels = vec![
            event(
                "CoreShowChannel",
                &[
                    ("Linkedid", "L-1"),
                    ("Channel", "PJSIP/1001-00000001"),
                    ("CallerIDnum", "1001"),
                    ("ChannelStateDesc", "Up"),
                    ("Duration", "00:00:30"),
                ],
            ),
            event(
                "CoreShowChannel",
                &[
                    ("Linkedid", "L-1"),
                    ("Channel", "PJSIP/1002-00000002"),
                    ("CallerIDnum", "1002"),
                    ("ChannelStateDesc", "Up"),
                    ("Duration", "00:00:28"),
                ],
            ),
        ];

        let table = build_table(&endpoints, &contacts, &registrations, &channels);

        assert_eq!(table.endpoints["1001"].status, EndpointStatus::Registered);
        assert_eq!(table.endpoints["1001"].rtt_ms, Some(15.0));
        assert_eq!(
            table.endpoints["1001"].contact_uri.as_deref(),
            Some("sip:1001@10.0.0.7:5060")
        );
        assert_eq!(table.endpoints["1002"].status, EndpointStatus::Unregistered);

        // Keyed by registry user so incremental Registry events match up.
        assert_eq!(table.trunks["user3"].status, TrunkRegStatus::Registered);

        // Both legs folded into one call, state taken from the live legs.
        assert_eq!(table.channels.len(), 1);
        let call = &table.channels["L-1"];
        assert_eq!(call.state, ChannelState::Up);
        assert_eq!(call.channel, "PJSIP/1001-00000001");
        assert_eq!(call.dest_channel, "PJSIP/1002-00000002");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_secs("00:00:12"), 12);
        assert_eq!(parse_duration_secs("01:02:03"), 3723);
        assert_eq!(parse_duration_secs("45"), 45);
        assert_eq!(parse_duration_secs("bogus"), 0);
    }

    #[test]
    fn test_cdr_disposition() {
        let channel = LiveChannel {
            id: "C-1".to_string(),
            channel: "PJSIP/1001-1".to_string(),
            dest_channel: "PJSIP/1002-2".to_string(),
            caller: "1001".to_string(),
            caller_name: "Alice".to_string(),
            destination: "1002".to_string(),
            dest_name: String::new(),
            state: ChannelState::Hungup,
            dial_status: Some("BUSY".to_string()),
            start_time: Utc::now(),
            answer_time: None,
        };

        let record = cdr_for(&channel, false);
        assert_eq!(record.disposition, "BUSY");
        assert_eq!(record.billsec, 0);
        assert_eq!(record.clid, "\"Alice\" <1001>");

        let record = cdr_for(&channel, true);
        assert_eq!(record.disposition, "ANSWERED");
    }
}
