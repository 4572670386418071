//! Config generation and publication for the switch.
//!
//! The renderers are pure functions from a relational snapshot to config
//! file text — no I/O, deterministic, testable in isolation. The publisher
//! owns all writes into the switch's config directory and the reload
//! commands that follow.

pub mod dialplan;
pub mod pjsip;
pub mod publisher;
pub mod queues;
pub mod snapshot;
pub mod voicemail;

pub use publisher::{AmiReloadTransport, ConfigPublisher, PublishReport, ReloadTransport};
pub use snapshot::ConfigSnapshot;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A data invariant was violated upstream; the publish attempt is
    /// rejected rather than papering over it.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("failed to write {file}: {source}")]
    Write {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot load failed: {0}")]
    Snapshot(#[from] sqlx::Error),
}

/// Which switch subsystem a rendered file belongs to. Each domain gets its
/// own reload command; they are never combined, so one failing domain does
/// not block the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadDomain {
    Pjsip,
    Dialplan,
    Voicemail,
    Queues,
}

impl ReloadDomain {
    pub fn file(&self) -> &'static str {
        match self {
            ReloadDomain::Pjsip => "pjsip.conf",
            ReloadDomain::Dialplan => "extensions.conf",
            ReloadDomain::Voicemail => "voicemail.conf",
            ReloadDomain::Queues => "queues.conf",
        }
    }

    /// CLI command issued through the manager interface after the file
    /// lands.
    pub fn reload_command(&self) -> &'static str {
        match self {
            ReloadDomain::Pjsip => "pjsip reload",
            ReloadDomain::Dialplan => "dialplan reload",
            ReloadDomain::Voicemail => "voicemail reload",
            ReloadDomain::Queues => "queue reload all",
        }
    }
}

impl std::fmt::Display for ReloadDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file())
    }
}

/// One rendered config file, ready to be written atomically.
#[derive(Debug, Clone)]
pub struct ConfigFragment {
    pub domain: ReloadDomain,
    pub contents: String,
}

impl ConfigFragment {
    pub fn file(&self) -> &'static str {
        self.domain.file()
    }
}

/// What kind of edit triggered the regeneration. Scopes map to the set of
/// files that edit can affect; `Full` regenerates everything (startup, or
/// when in doubt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishScope {
    /// Peer add/edit/delete: endpoint sections, mailbox, hints.
    Endpoints,
    /// Trunk add/edit/delete: trunk sections plus outbound dialing.
    Trunks,
    /// Routes, forwards, ring groups, IVR menus.
    Routing,
    /// Mailbox edits: voicemail.conf plus ring timeouts in the dialplan.
    Voicemail,
    Full,
}

impl PublishScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "endpoints" => Some(PublishScope::Endpoints),
            "trunks" => Some(PublishScope::Trunks),
            "routing" => Some(PublishScope::Routing),
            "voicemail" => Some(PublishScope::Voicemail),
            "full" => Some(PublishScope::Full),
            _ => None,
        }
    }

    pub fn domains(&self) -> &'static [ReloadDomain] {
        match self {
            PublishScope::Endpoints => &[
                ReloadDomain::Pjsip,
                ReloadDomain::Voicemail,
                ReloadDomain::Dialplan,
            ],
            PublishScope::Trunks => &[ReloadDomain::Pjsip, ReloadDomain::Dialplan],
            PublishScope::Routing => &[ReloadDomain::Dialplan, ReloadDomain::Queues],
            PublishScope::Voicemail => &[ReloadDomain::Voicemail, ReloadDomain::Dialplan],
            PublishScope::Full => &[
                ReloadDomain::Pjsip,
                ReloadDomain::Dialplan,
                ReloadDomain::Voicemail,
                ReloadDomain::Queues,
            ],
        }
    }
}

/// Render the fragments a scope touches. Validates the snapshot first;
/// rendering itself cannot fail on a valid snapshot.
pub fn render(
    snapshot: &ConfigSnapshot,
    scope: PublishScope,
) -> Result<Vec<ConfigFragment>, ProvisionError> {
    snapshot.validate()?;

    scope
        .domains()
        .iter()
        .map(|&domain| {
            let contents = match domain {
                ReloadDomain::Pjsip => pjsip::render(snapshot),
                ReloadDomain::Dialplan => dialplan::render(snapshot),
                ReloadDomain::Voicemail => voicemail::render(snapshot),
                ReloadDomain::Queues => queues::render(snapshot),
            };
            Ok(ConfigFragment { domain, contents })
        })
        .collect()
}
