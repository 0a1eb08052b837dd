//! Broadcast channel interface and the in-memory implementation
//!
//! One topic per session. Delivery is at-least-once with no ordering across
//! publishers; subscribers rely on the reconciler to make that safe.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{Session, SessionId};

/// Stream of canonical snapshots for one session
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Session>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Session>) -> Self {
        Self { receiver }
    }

    /// Next snapshot, or `None` once the channel has closed
    pub async fn next(&mut self) -> Option<Session> {
        self.receiver.recv().await
    }
}

/// Low-latency fan-out of snapshots to session subscribers
pub trait Broadcast {
    fn publish(&self, snapshot: &Session) -> impl Future<Output = StoreResult<()>> + Send;

    fn subscribe(&self, session: SessionId)
    -> impl Future<Output = StoreResult<Subscription>> + Send;
}

/// Process-local broadcast, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct MemoryBroadcast {
    topics: Arc<Mutex<HashMap<SessionId, Vec<mpsc::UnboundedSender<Session>>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the channel
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory broadcast offline".to_string()));
        }
        Ok(())
    }
}

impl Broadcast for MemoryBroadcast {
    async fn publish(&self, snapshot: &Session) -> StoreResult<()> {
        self.ensure_available()?;
        let mut topics = self.topics.lock().await;
        if let Some(subscribers) = topics.get_mut(&snapshot.id) {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
            debug!(
                session = %snapshot.id,
                version = snapshot.version,
                subscribers = subscribers.len(),
                "snapshot published"
            );
        }
        Ok(())
    }

    async fn subscribe(&self, session: SessionId) -> StoreResult<Subscription> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.lock().await.entry(session).or_default().push(tx);
        Ok(Subscription::new(rx))
    }
}
