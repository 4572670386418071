//! Typed view over the switch's free-form events.
//!
//! The manager protocol delivers loosely structured key/value blocks; new
//! event types appear between switch releases. Everything the aggregator
//! cares about is lifted into `SwitchEvent`, and anything else lands in
//! `Unrecognized` so an unknown event can never crash state tracking.

use crate::server::ami::protocol::AmiEvent;

/// Events the aggregator reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchEvent {
    /// Qualify/contact report for an internal extension.
    ContactStatus {
        extension: String,
        reachable: Option<bool>,
        uri: Option<String>,
        rtt_ms: Option<f64>,
    },
    /// Legacy reachability report, same state machine as `ContactStatus`.
    PeerStatus { extension: String, reachable: bool },
    /// Outbound trunk registration result.
    Registry {
        key: String,
        registered: bool,
        status: String,
    },
    /// A call started ringing.
    DialBegin {
        linked_id: String,
        channel: String,
        dest_channel: String,
        caller: String,
        caller_name: String,
        destination: String,
        dest_name: String,
    },
    /// The dial attempt finished; `dial_status` is `ANSWER` on pickup.
    DialEnd {
        linked_id: String,
        dial_status: String,
    },
    /// Terminal hangup for the whole call.
    Hangup { linked_id: String },
    /// Anything we do not model; forwarded raw to subscribers.
    Unrecognized { name: String },
}

/// Strip the channel technology prefix: `PJSIP/1001` -> `1001`.
fn extension_of(peer: &str) -> String {
    peer.rsplit('/').next().unwrap_or(peer).to_string()
}

fn field(event: &AmiEvent, key: &str) -> String {
    event.get(key).unwrap_or_default().to_string()
}

impl SwitchEvent {
    pub fn from_ami(event: &AmiEvent) -> Self {
        match event.name.as_str() {
            "ContactStatus" => {
                let status = event.get("ContactStatus").unwrap_or_default();
                let reachable = match status {
                    "Reachable" | "Created" => Some(true),
                    "Unreachable" | "Removed" => Some(false),
                    _ => None,
                };
                SwitchEvent::ContactStatus {
                    extension: extension_of(
                        event.get("EndpointName").or(event.get("AOR")).unwrap_or_default(),
                    ),
                    reachable,
                    uri: event.get("URI").map(|s| s.to_string()),
                    rtt_ms: event
                        .get("RTT")
                        .or(event.get("RoundtripUsec"))
                        .and_then(|v| v.parse::<f64>().ok())
                        .map(|usec| usec / 1000.0),
                }
            }
            "PeerStatus" => {
                let status = event.get("PeerStatus").unwrap_or_default();
                SwitchEvent::PeerStatus {
                    extension: extension_of(event.get("Peer").unwrap_or_default()),
                    reachable: matches!(status, "Reachable" | "Registered"),
                }
            }
            "Registry" => {
                let status = field(event, "Status");
                SwitchEvent::Registry {
                    key: event
                        .get("Username")
                        .filter(|u| !u.is_empty())
                        .or(event.get("Domain"))
                        .unwrap_or_default()
                        .to_string(),
                    registered: status == "Registered",
                    status,
                }
            }
            "DialBegin" => SwitchEvent::DialBegin {
                linked_id: field(event, "Linkedid"),
                channel: field(event, "Channel"),
                dest_channel: field(event, "DestChannel"),
                caller: field(event, "CallerIDNum"),
                caller_name: field(event, "CallerIDName"),
                destination: field(event, "DestCallerIDNum"),
                dest_name: field(event, "DestCallerIDName"),
            },
            "DialEnd" => SwitchEvent::DialEnd {
                linked_id: field(event, "Linkedid"),
                dial_status: field(event, "DialStatus"),
            },
            "Hangup" => SwitchEvent::Hangup {
                linked_id: field(event, "Linkedid"),
            },
            other => SwitchEvent::Unrecognized {
                name: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event(name: &str, fields: &[(&str, &str)]) -> AmiEvent {
        AmiEvent {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_contact_status_reachable() {
        let ev = event(
            "ContactStatus",
            &[
                ("EndpointName", "1001"),
                ("ContactStatus", "Reachable"),
                ("URI", "sip:1001@10.0.0.7:5060"),
                ("RTT", "12000"),
            ],
        );

        match SwitchEvent::from_ami(&ev) {
            SwitchEvent::ContactStatus {
                extension,
                reachable,
                uri,
                rtt_ms,
            } => {
                assert_eq!(extension, "1001");
                assert_eq!(reachable, Some(true));
                assert_eq!(uri.as_deref(), Some("sip:1001@10.0.0.7:5060"));
                assert_eq!(rtt_ms, Some(12.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_peer_status_strips_technology_prefix() {
        let ev = event(
            "PeerStatus",
            &[("Peer", "PJSIP/1002"), ("PeerStatus", "Unreachable")],
        );

        match SwitchEvent::from_ami(&ev) {
            SwitchEvent::PeerStatus {
                extension,
                reachable,
            } => {
                assert_eq!(extension, "1002");
                assert!(!reachable);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_registry_keyed_by_username_with_domain_fallback() {
        let ev = event(
            "Registry",
            &[
                ("ChannelDriver", "PJSIP"),
                ("Domain", "sip.ipfonie.de"),
                ("Status", "Registered"),
            ],
        );

        match SwitchEvent::from_ami(&ev) {
            SwitchEvent::Registry {
                key, registered, ..
            } => {
                assert_eq!(key, "sip.ipfonie.de");
                assert!(registered);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_maps_to_unrecognized() {
        let ev = event("FullyBooted", &[("Status", "Fully Booted")]);
        assert_eq!(
            SwitchEvent::from_ami(&ev),
            SwitchEvent::Unrecognized {
                name: "FullyBooted".to_string()
            }
        );
    }
}
