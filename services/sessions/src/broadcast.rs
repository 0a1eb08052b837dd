//! Redis pub/sub broadcast of session snapshots
//!
//! Each session has its own channel, `session:<id>`. Payloads are JSON
//! snapshots; malformed ones are dropped with a warning.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use common::cache::RedisPool;
use engine::{Broadcast, Session, SessionId, StoreError, StoreResult, Subscription};

#[derive(Debug, Clone)]
pub struct RedisBroadcast {
    redis: RedisPool,
}

impl RedisBroadcast {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }
}

fn channel(session: SessionId) -> String {
    format!("session:{session}")
}

fn decode(payload: &str) -> Result<Session, serde_json::Error> {
    serde_json::from_str(payload)
}

impl Broadcast for RedisBroadcast {
    async fn publish(&self, snapshot: &Session) -> StoreResult<()> {
        let payload =
            serde_json::to_string(snapshot).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let receivers = self
            .redis
            .publish(&channel(snapshot.id), &payload)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(
            session = %snapshot.id,
            version = snapshot.version,
            receivers,
            "snapshot published"
        );
        Ok(())
    }

    async fn subscribe(&self, session: SessionId) -> StoreResult<Subscription> {
        let mut payloads = self
            .redis
            .subscribe(&channel(session))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = payloads.next() => {
                        let Some(payload) = next else { break };
                        match decode(&payload) {
                            Ok(snapshot) => {
                                if tx.send(snapshot).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(%session, "dropping malformed snapshot: {}", e),
                        }
                    }
                }
            }
            debug!(%session, "subscription closed");
        });

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cache::RedisConfig;
    use engine::TimeControl;

    #[test]
    fn test_channel_per_session() {
        let id = SessionId::new();
        assert_eq!(channel(id), format!("session:{}", id));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let session = Session::new(SessionId::new(), "alice".into(), TimeControl::BLITZ, None, 0);
        let payload = serde_json::to_string(&session).unwrap();
        assert_eq!(decode(&payload).unwrap(), session);
        assert!(decode("{\"id\":1}").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_snapshot_round_trip_through_redis() -> anyhow::Result<()> {
        let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
        let broadcast = RedisBroadcast::new(redis);
        let session = Session::new(SessionId::new(), "alice".into(), TimeControl::BLITZ, None, 0);

        let mut subscription = broadcast.subscribe(session.id).await?;
        broadcast.publish(&session).await?;
        assert_eq!(subscription.next().await, Some(session));
        Ok(())
    }
}
