//! Writes rendered fragments into the switch's config directory and asks
//! the switch to reload the affected subsystems.
//!
//! Each file is written to a temporary name in the target directory and
//! renamed over the final path, so the switch can never observe a partially
//! written file. Publishes are strictly serialized: concurrent callers
//! queue behind a fair mutex, which rules out interleaved partial reloads
//! from two simultaneous edits. A failed reload is reported per domain and
//! does not roll back the files already written.

use std::path::PathBuf;

use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::server::ami::protocol::AmiAction;
use crate::server::ami::AmiGateway;

use super::{ConfigFragment, ProvisionError, ReloadDomain};

/// Seam between the publisher and the switch so publishing is testable
/// without a live manager connection.
#[async_trait::async_trait]
pub trait ReloadTransport: Send + Sync {
    /// Err carries the switch's (or link's) complaint verbatim.
    async fn reload(&self, domain: ReloadDomain) -> Result<(), String>;
}

/// Production transport: one CLI command per domain through the manager
/// link.
pub struct AmiReloadTransport {
    gateway: AmiGateway,
}

impl AmiReloadTransport {
    pub fn new(gateway: AmiGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl ReloadTransport for AmiReloadTransport {
    async fn reload(&self, domain: ReloadDomain) -> Result<(), String> {
        let action = AmiAction::new("Command").param("Command", domain.reload_command());
        match self.gateway.execute(action).await {
            Ok(response) if response.success => Ok(()),
            Ok(response) => Err(response
                .message
                .unwrap_or_else(|| "reload rejected".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Outcome of one publish: which files landed and how each domain's reload
/// went. Reload failures are per-domain so a voicemail hiccup is never
/// conflated with the dialplan applying cleanly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub written: Vec<&'static str>,
    pub reloaded: Vec<ReloadDomain>,
    pub reload_failures: Vec<ReloadFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadFailure {
    pub domain: ReloadDomain,
    pub message: String,
}

impl PublishReport {
    pub fn fully_applied(&self) -> bool {
        self.reload_failures.is_empty()
    }
}

pub struct ConfigPublisher {
    config_dir: PathBuf,
    transport: std::sync::Arc<dyn ReloadTransport>,
    /// Tokio's mutex wakes waiters in FIFO order, which is exactly the
    /// queueing the publish contract asks for.
    gate: tokio::sync::Mutex<()>,
}

impl ConfigPublisher {
    pub fn new(config_dir: impl Into<PathBuf>, transport: std::sync::Arc<dyn ReloadTransport>) -> Self {
        Self {
            config_dir: config_dir.into(),
            transport,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Write all fragments, then reload each affected domain. At most one
    /// publish is in flight at a time.
    pub async fn publish(
        &self,
        fragments: Vec<ConfigFragment>,
    ) -> Result<PublishReport, ProvisionError> {
        let _serialized = self.gate.lock().await;

        let mut written = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            self.write_atomic(fragment)
                .await
                .map_err(|source| ProvisionError::Write {
                    file: fragment.file().to_string(),
                    source,
                })?;
            written.push(fragment.file());
        }

        let mut reloaded = Vec::new();
        let mut reload_failures = Vec::new();
        for fragment in &fragments {
            // One reload per domain; a failure here must not stop the
            // remaining domains from reloading.
            match self.transport.reload(fragment.domain).await {
                Ok(()) => {
                    tracing::info!(domain = %fragment.domain, "switch config reloaded");
                    reloaded.push(fragment.domain);
                }
                Err(message) => {
                    tracing::error!(domain = %fragment.domain, "reload failed: {}", message);
                    reload_failures.push(ReloadFailure {
                        domain: fragment.domain,
                        message,
                    });
                }
            }
        }

        Ok(PublishReport {
            written,
            reloaded,
            reload_failures,
        })
    }

    async fn write_atomic(&self, fragment: &ConfigFragment) -> std::io::Result<()> {
        fs::create_dir_all(&self.config_dir).await?;

        let final_path = self.config_dir.join(fragment.file());
        let tmp_path = self
            .config_dir
            .join(format!(".{}.{}.tmp", fragment.file(), Uuid::new_v4()));

        fs::write(&tmp_path, fragment.contents.as_bytes()).await?;
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        Ok(())
    }
}
