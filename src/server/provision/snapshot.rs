//! Relational snapshot handed to the renderers, plus its invariant checks.
//!
//! The CRUD layer validates user input; this validation exists to fail hard
//! on anything that slipped past it, so a bad row rejects the publish
//! attempt instead of producing a config the switch half-understands.

use std::collections::{HashMap, HashSet};

use crate::models::{
    CallForward, ForwardType, IvrMenu, InboundRoute, RingGroup, SipPeer, SipTrunk,
    TrunkAuthMode, VoicemailBox,
};

use super::ProvisionError;

/// Read-only copy of everything the renderers need. Loaded in one pass so
/// all files are generated from the same point-in-time view.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub peers: Vec<SipPeer>,
    pub trunks: Vec<SipTrunk>,
    pub routes: Vec<InboundRoute>,
    pub forwards: Vec<CallForward>,
    pub ring_groups: Vec<RingGroup>,
    pub mailboxes: Vec<VoicemailBox>,
    pub ivr_menus: Vec<IvrMenu>,
}

fn is_number(s: &str) -> bool {
    let digits = s.strip_prefix('+').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

impl ConfigSnapshot {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        for peer in self.peers.iter().filter(|p| p.enabled) {
            if !is_number(&peer.extension) {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "peer id {} has a non-numeric extension",
                    peer.id
                )));
            }
            if peer.secret.is_empty() {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "extension {} has an empty secret",
                    peer.extension
                )));
            }
        }

        for trunk in self.trunks.iter().filter(|t| t.enabled) {
            let Some(mode) = trunk.auth_mode() else {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "trunk {} has unknown auth mode {:?}",
                    trunk.name, trunk.auth_mode
                )));
            };
            if trunk.resolved_server().is_none() {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "trunk {} has no SIP server and no known provider profile",
                    trunk.name
                )));
            }
            if mode == TrunkAuthMode::Registration
                && (trunk.username.as_deref().unwrap_or_default().is_empty()
                    || trunk.password.as_deref().unwrap_or_default().is_empty())
            {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "trunk {} registers but has no credentials",
                    trunk.name
                )));
            }
        }

        let mut forward_keys = HashSet::new();
        for forward in self.forwards.iter().filter(|f| f.enabled) {
            let Some(kind) = forward.forward_type() else {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "forward id {} has unknown type {:?}",
                    forward.id, forward.forward_type
                )));
            };
            if forward.ring_time <= 0 {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "forward for {} has non-positive ring time",
                    forward.extension
                )));
            }
            if !forward_keys.insert((forward.extension.clone(), kind)) {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "extension {} has more than one active {:?} forward",
                    forward.extension, kind
                )));
            }
        }

        for group in self.ring_groups.iter().filter(|g| g.enabled) {
            if group.strategy().is_none() {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "ring group {} has unknown strategy {:?}",
                    group.name, group.strategy
                )));
            }
            if group.ring_time <= 0 {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "ring group {} has non-positive ring time",
                    group.name
                )));
            }
        }

        for mailbox in self.mailboxes.iter().filter(|m| m.enabled) {
            if mailbox.ring_timeout <= 0 {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "mailbox {} has non-positive ring timeout",
                    mailbox.extension
                )));
            }
        }

        // A DID resolves to exactly one destination, across direct routes
        // and ring-group/IVR bindings alike. Conflicts are rejected here,
        // not tie-broken at render time.
        let mut did_targets: HashMap<&str, &str> = HashMap::new();
        for route in self.routes.iter().filter(|r| r.enabled) {
            if !is_number(&route.did) {
                return Err(ProvisionError::InvalidSnapshot(format!(
                    "inbound route id {} has a malformed DID {:?}",
                    route.id, route.did
                )));
            }
            if let Some(existing) =
                did_targets.insert(&route.did, &route.destination_extension)
            {
                if existing != route.destination_extension {
                    return Err(ProvisionError::InvalidSnapshot(format!(
                        "DID {} is bound to both {} and {}",
                        route.did, existing, route.destination_extension
                    )));
                }
            }
        }
        for group in self.ring_groups.iter().filter(|g| g.enabled) {
            if let Some(did) = group.inbound_did.as_deref().filter(|d| !d.is_empty()) {
                if let Some(existing) = did_targets.insert(did, &group.extension) {
                    if existing != group.extension {
                        return Err(ProvisionError::InvalidSnapshot(format!(
                            "DID {} is bound to both {} and ring group {}",
                            did, existing, group.name
                        )));
                    }
                }
            }
        }
        for menu in self.ivr_menus.iter().filter(|m| m.enabled) {
            if let Some(did) = menu.inbound_did.as_deref().filter(|d| !d.is_empty()) {
                if let Some(existing) = did_targets.insert(did, &menu.extension) {
                    if existing != menu.extension {
                        return Err(ProvisionError::InvalidSnapshot(format!(
                            "DID {} is bound to both {} and IVR menu {}",
                            did, existing, menu.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// extension -> type -> rule, enabled rules only.
    pub fn forward_map(&self) -> HashMap<&str, HashMap<ForwardType, &CallForward>> {
        let mut map: HashMap<&str, HashMap<ForwardType, &CallForward>> = HashMap::new();
        for forward in self.forwards.iter().filter(|f| f.enabled) {
            if let Some(kind) = forward.forward_type() {
                map.entry(forward.extension.as_str())
                    .or_default()
                    .insert(kind, forward);
            }
        }
        map
    }

    /// extension -> ring timeout before voicemail, enabled mailboxes only.
    pub fn ring_timeout_map(&self) -> HashMap<&str, i32> {
        self.mailboxes
            .iter()
            .filter(|m| m.enabled)
            .map(|m| (m.extension.as_str(), m.ring_timeout))
            .collect()
    }

    pub fn ring_group_by_extension(&self, extension: &str) -> Option<&RingGroup> {
        self.ring_groups
            .iter()
            .find(|g| g.enabled && g.extension == extension)
    }

    pub fn ivr_by_extension(&self, extension: &str) -> Option<&IvrMenu> {
        self.ivr_menus
            .iter()
            .find(|m| m.enabled && m.extension == extension)
    }

    pub fn mailbox_for(&self, extension: &str) -> Option<&VoicemailBox> {
        self.mailboxes
            .iter()
            .find(|m| m.enabled && m.extension == extension)
    }
}

#[cfg(test)]
pub mod test_fixtures {
    use chrono::Utc;

    use crate::models::{
        CallForward, InboundRoute, IvrMenu, RingGroup, SipPeer, SipTrunk, VoicemailBox,
    };

    pub fn peer(extension: &str, secret: &str) -> SipPeer {
        SipPeer {
            id: extension.parse().unwrap_or(0),
            extension: extension.to_string(),
            secret: secret.to_string(),
            caller_id: None,
            context: "internal".to_string(),
            outbound_cid: None,
            blf_enabled: true,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn trunk(id: i64, name: &str, auth_mode: &str) -> SipTrunk {
        SipTrunk {
            id,
            name: name.to_string(),
            provider: "plusnet_basic".to_string(),
            auth_mode: auth_mode.to_string(),
            sip_server: "sip.ipfonie.de".to_string(),
            username: Some(format!("user{}", id)),
            password: Some(format!("pass{}", id)),
            caller_id: None,
            number_block: None,
            context: "from-trunk".to_string(),
            codecs: "ulaw,alaw,g722".to_string(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn route(id: i64, did: &str, trunk_id: i64, destination: &str) -> InboundRoute {
        InboundRoute {
            id,
            did: did.to_string(),
            trunk_id,
            destination_extension: destination.to_string(),
            description: None,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn forward(extension: &str, forward_type: &str, destination: &str) -> CallForward {
        CallForward {
            id: 0,
            extension: extension.to_string(),
            forward_type: forward_type.to_string(),
            destination: destination.to_string(),
            ring_time: 20,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn group(id: i64, name: &str, extension: &str, members: &[&str]) -> RingGroup {
        RingGroup {
            id,
            name: name.to_string(),
            extension: extension.to_string(),
            inbound_trunk_id: None,
            inbound_did: None,
            strategy: "ringall".to_string(),
            ring_time: 20,
            enabled: true,
            members: members.iter().map(|m| m.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn mailbox(extension: &str) -> VoicemailBox {
        VoicemailBox {
            id: 0,
            extension: extension.to_string(),
            enabled: true,
            pin: "1234".to_string(),
            name: None,
            email: None,
            ring_timeout: 20,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn menu(id: i64, name: &str, extension: &str) -> IvrMenu {
        IvrMenu {
            id,
            name: name.to_string(),
            extension: extension.to_string(),
            prompt: Some("main-menu".to_string()),
            timeout_seconds: 5,
            retries: 2,
            timeout_destination: None,
            inbound_trunk_id: None,
            inbound_did: None,
            enabled: true,
            options: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
