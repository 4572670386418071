//! Reconnect supervision for the manager link.
//!
//! The supervisor is the only component allowed to call `connect`. It runs
//! the explicit `Disconnected -> Connecting -> Connected` loop with
//! exponential backoff, resynchronizes the state aggregator before event
//! delivery resumes, and publishes the link status so the GUI can show
//! connectivity separately from config-apply failures. A switch that never
//! comes back keeps the status at `Degraded`; it is never fatal to the
//! admin service itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::models::{LinkStatus, StateChange};
use crate::server::live::{BroadcastHub, StateAggregator};

use super::client::{AmiConnection, AmiHandle};
use super::protocol::{AmiAction, AmiEvent, AmiResponse};
use super::{AmiConfig, AmiError};

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Shared access point to the current connection. Empty while the link is
/// down; callers get `NotConnected` instead of waiting.
#[derive(Clone, Default)]
pub struct AmiGateway {
    inner: Arc<RwLock<Option<AmiHandle>>>,
}

impl AmiGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_connected(&self) -> bool {
        match self.inner.read().await.as_ref() {
            Some(handle) => handle.is_connected(),
            None => false,
        }
    }

    pub async fn execute(&self, action: AmiAction) -> Result<AmiResponse, AmiError> {
        let handle = self.handle().await?;
        handle.execute(action).await
    }

    pub async fn execute_list(
        &self,
        action: AmiAction,
    ) -> Result<(AmiResponse, Vec<AmiEvent>), AmiError> {
        let handle = self.handle().await?;
        handle.execute_list(action).await
    }

    async fn handle(&self) -> Result<AmiHandle, AmiError> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or(AmiError::NotConnected)
    }

    async fn set(&self, handle: AmiHandle) {
        *self.inner.write().await = Some(handle);
    }

    async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

pub struct AmiSupervisor {
    config: AmiConfig,
    gateway: AmiGateway,
    aggregator: Arc<StateAggregator>,
    hub: Arc<BroadcastHub>,
    status: watch::Sender<LinkStatus>,
    cancel: CancellationToken,
}

impl AmiSupervisor {
    pub fn new(
        config: AmiConfig,
        gateway: AmiGateway,
        aggregator: Arc<StateAggregator>,
        hub: Arc<BroadcastHub>,
        status: watch::Sender<LinkStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            gateway,
            aggregator,
            hub,
            status,
            cancel,
        }
    }

    /// Run until cancelled. Never returns an error: connection failures are
    /// the normal case this loop exists to absorb.
    pub async fn run(self) {
        let mut backoff = BACKOFF_START;
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            self.set_status(LinkStatus::Connecting).await;
            tracing::info!(
                host = %self.config.host,
                port = self.config.port,
                "connecting to manager interface"
            );

            match AmiConnection::open(&self.config).await {
                Ok((connection, mut events)) => {
                    backoff = BACKOFF_START;
                    attempts = 0;

                    let handle = connection.handle();
                    self.gateway.set(handle.clone()).await;

                    // Resync before resuming incremental delivery, so
                    // staleness after the outage is bounded by this one
                    // round-trip.
                    if let Err(e) = self.aggregator.resync(&handle).await {
                        tracing::warn!("resync after reconnect failed: {}", e);
                    }
                    self.set_status(LinkStatus::Connected).await;

                    loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                connection.close();
                                return;
                            }
                            event = events.recv() => match event {
                                Some(event) => self.aggregator.apply(event).await,
                                None => break,
                            }
                        }
                    }

                    self.gateway.clear().await;
                    tracing::warn!("manager link lost, reconnecting");
                }
                Err(e) => {
                    attempts += 1;
                    self.set_status(LinkStatus::Degraded { attempts }).await;
                    tracing::warn!(
                        attempts,
                        "manager connect failed ({}), retrying in {:?}",
                        e,
                        backoff
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }

    async fn set_status(&self, status: LinkStatus) {
        let changed = *self.status.borrow() != status;
        if changed {
            let _ = self.status.send(status.clone());
            self.hub.publish_state(StateChange::Link(status)).await;
        }
    }
}
