//! Fan-out of live updates to connected admin sessions.
//!
//! Each session gets its own bounded queue. Delivery uses `try_send`: a
//! session that cannot keep up (or silently went away) is evicted on the
//! spot, so one slow client can never hold back the aggregator or the other
//! sessions. An evicted client reconnects and receives a fresh snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::models::StateChange;
use crate::server::ami::protocol::AmiEvent;

/// Outbound capacity per session before it is considered too slow.
const SESSION_QUEUE: usize = 64;

/// What goes over the push channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum PushMessage {
    /// A derived state transition.
    State(StateChange),
    /// A raw switch event, for clients that want the firehose.
    Event(AmiEvent),
}

pub struct BroadcastHub {
    sessions: Mutex<HashMap<u64, mpsc::Sender<PushMessage>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a session; the receiver is the session's outbound queue.
    pub async fn register(&self) -> (u64, mpsc::Receiver<PushMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let mut sessions = self.sessions.lock().await;
        sessions.insert(id, tx);
        tracing::info!(session = id, total = sessions.len(), "admin session registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&id).is_some() {
            tracing::info!(session = id, total = sessions.len(), "admin session closed");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Push to every session. Never blocks: full or closed queues get their
    /// session dropped instead.
    pub async fn publish(&self, message: PushMessage) {
        let mut sessions = self.sessions.lock().await;
        let mut evicted = Vec::new();

        for (id, tx) in sessions.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(session = id, "session queue overflow, dropping session");
                    evicted.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            sessions.remove(&id);
        }
    }

    pub async fn publish_state(&self, change: StateChange) {
        self.publish(PushMessage::State(change)).await;
    }

    pub async fn publish_event(&self, event: AmiEvent) {
        self.publish(PushMessage::Event(event)).await;
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
