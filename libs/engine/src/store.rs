//! Persistent store interface and the in-memory implementation
//!
//! Writes are always full snapshots conditioned on the version the writer
//! last observed. The store bumps the version on every accepted write and
//! reports [`WriteOutcome::Conflict`] instead of silently overwriting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{Session, SessionId};

/// Result of a version-conditioned write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Written(T),
    /// The stored version no longer matches, or the record is gone
    Conflict,
}

/// Durable home of session records
pub trait SessionStore {
    /// Inserts a new record at version 1 and returns it
    fn create_session(&self, session: &Session)
    -> impl Future<Output = StoreResult<Session>> + Send;

    /// Replaces the record with `next` if its version is `expected_version`
    fn update_session(
        &self,
        next: &Session,
        expected_version: u64,
    ) -> impl Future<Output = StoreResult<WriteOutcome<Session>>> + Send;

    fn fetch_session(&self, id: SessionId)
    -> impl Future<Output = StoreResult<Option<Session>>> + Send;

    /// Deletes the record if its version is still `expected_version`
    fn delete_session(
        &self,
        id: SessionId,
        expected_version: u64,
    ) -> impl Future<Output = StoreResult<WriteOutcome<()>>> + Send;
}

/// Process-local store, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<SessionId, Session>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stored record, in no particular order
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.records.lock().await.keys().copied().collect()
    }

    /// Simulates losing (or regaining) the connection to the store
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> StoreResult<Session> {
        self.ensure_available()?;
        let mut records = self.records.lock().await;
        if records.contains_key(&session.id) {
            return Err(StoreError::Conflict);
        }

        let mut stored = session.clone();
        stored.version = 1;
        records.insert(stored.id, stored.clone());
        debug!(session = %stored.id, "session stored");
        Ok(stored)
    }

    async fn update_session(
        &self,
        next: &Session,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome<Session>> {
        self.ensure_available()?;
        let mut records = self.records.lock().await;
        let Some(current) = records.get_mut(&next.id) else {
            return Ok(WriteOutcome::Conflict);
        };
        if current.version != expected_version {
            debug!(
                session = %next.id,
                expected_version,
                actual = current.version,
                "conditional write rejected"
            );
            return Ok(WriteOutcome::Conflict);
        }

        let mut stored = next.clone();
        stored.version = expected_version + 1;
        *current = stored.clone();
        Ok(WriteOutcome::Written(stored))
    }

    async fn fetch_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.ensure_available()?;
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn delete_session(
        &self,
        id: SessionId,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome<()>> {
        self.ensure_available()?;
        let mut records = self.records.lock().await;
        match records.get(&id) {
            Some(current) if current.version != expected_version => Ok(WriteOutcome::Conflict),
            _ => {
                records.remove(&id);
                Ok(WriteOutcome::Written(()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeControl;

    fn session() -> Session {
        Session::new(SessionId::new(), "alice".into(), TimeControl::RAPID, None, 0)
    }

    #[tokio::test]
    async fn test_versioned_writes() {
        let store = MemoryStore::new();
        let created = store.create_session(&session()).await.unwrap();
        assert_eq!(created.version, 1);

        let mut next = created.clone();
        next.updated_at = 5;
        let written = match store.update_session(&next, 1).await.unwrap() {
            WriteOutcome::Written(s) => s,
            WriteOutcome::Conflict => panic!("expected write"),
        };
        assert_eq!(written.version, 2);

        // a writer still holding version 1 loses
        assert_eq!(
            store.update_session(&next, 1).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(store.fetch_session(created.id).await.unwrap(), Some(written));
    }

    #[tokio::test]
    async fn test_conditional_delete() {
        let store = MemoryStore::new();
        let created = store.create_session(&session()).await.unwrap();
        let mut next = created.clone();
        next.updated_at = 1;
        store.update_session(&next, 1).await.unwrap();

        assert_eq!(
            store.delete_session(created.id, 1).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store.delete_session(created.id, 2).await.unwrap(),
            WriteOutcome::Written(())
        );
        assert_eq!(store.fetch_session(created.id).await.unwrap(), None);
        assert!(store.session_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.fetch_session(SessionId::new()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert_eq!(store.fetch_session(SessionId::new()).await.unwrap(), None);
    }
}
