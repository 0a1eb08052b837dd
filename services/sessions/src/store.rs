//! PostgreSQL-backed session store
//!
//! One row per session. The full snapshot lives in a `jsonb` column next to
//! a `version` column that every conditional write is checked against.

use sqlx::{PgPool, Row, types::Json};
use tracing::{debug, info};

use common::error::{DatabaseError, DatabaseResult};
use engine::{Session, SessionId, SessionStore, StoreError, StoreResult, WriteOutcome};

/// Session store repository
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `sessions` table if it does not exist yet
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                version BIGINT NOT NULL,
                snapshot JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Schema(e.to_string()))?;

        info!("Sessions schema ready");
        Ok(())
    }

    async fn exists(&self, id: SessionId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.is_some())
    }
}

/// Postgres has no unsigned integers
fn to_column(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} overflows")))
}

fn store_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            StoreError::Corrupt(e.to_string())
        }
        _ => StoreError::Unavailable(format!("Database query error: {e}")),
    }
}

impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: &Session) -> StoreResult<Session> {
        let mut stored = session.clone();
        stored.version = 1;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, version, snapshot)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(to_column(stored.version)?)
        .bind(Json(&stored))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        debug!(session = %stored.id, "session stored");
        Ok(stored)
    }

    async fn update_session(
        &self,
        next: &Session,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome<Session>> {
        let mut stored = next.clone();
        stored.version = expected_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET version = $1, snapshot = $2, updated_at = NOW()
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(to_column(stored.version)?)
        .bind(Json(&stored))
        .bind(stored.id.as_uuid())
        .bind(to_column(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            debug!(session = %next.id, expected_version, "conditional write rejected");
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(stored))
    }

    async fn fetch_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT snapshot FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(row) => {
                let Json(session) = row
                    .try_get::<Json<Session>, _>("snapshot")
                    .map_err(store_error)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn delete_session(
        &self,
        id: SessionId,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome<()>> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND version = $2")
            .bind(id.as_uuid())
            .bind(to_column(expected_version)?)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        // Deleting a record that is already gone succeeds.
        if result.rows_affected() == 0 && self.exists(id).await? {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::database::{DatabaseConfig, init_pool};
    use engine::TimeControl;

    #[test]
    fn test_version_column_bounds() {
        assert_eq!(to_column(7).unwrap(), 7);
        assert!(matches!(to_column(u64::MAX), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_transport_errors_are_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::Decode("bad json".into())),
            StoreError::Corrupt(_)
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    async fn test_conditional_writes_against_postgres() -> anyhow::Result<()> {
        let pool = init_pool(&DatabaseConfig::from_env()?).await?;
        let store = PgSessionStore::new(pool);
        store.ensure_schema().await?;

        let draft = Session::new(SessionId::new(), "alice".into(), TimeControl::RAPID, None, 0);
        let created = store.create_session(&draft).await?;
        assert_eq!(created.version, 1);

        let mut next = created.clone();
        next.updated_at = 1;
        let written = match store.update_session(&next, 1).await? {
            WriteOutcome::Written(s) => s,
            WriteOutcome::Conflict => panic!("expected write"),
        };
        assert_eq!(written.version, 2);
        assert_eq!(store.update_session(&next, 1).await?, WriteOutcome::Conflict);
        assert_eq!(store.fetch_session(created.id).await?, Some(written));

        assert_eq!(store.delete_session(created.id, 1).await?, WriteOutcome::Conflict);
        assert_eq!(store.delete_session(created.id, 2).await?, WriteOutcome::Written(()));
        assert_eq!(store.fetch_session(created.id).await?, None);
        Ok(())
    }
}
