use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::action::{ActionRecord, Purpose, StoredAction},
    stores::permanent::PermanentStore,
};

/// Advisory lock id held by whichever instance is sweeping.
const SWEEP_LOCK_ID: i64 = 0x5245_564f_4b45;

const UPSERT: &str = r#"
    INSERT INTO revocation_actions (action_key, purpose, issued_at, expires_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (action_key) DO UPDATE
    SET purpose = EXCLUDED.purpose,
        issued_at = EXCLUDED.issued_at,
        expires_at = EXCLUDED.expires_at
"#;

const SELECT_UNEXPIRED: &str = r#"
    SELECT action_key, purpose, issued_at, expires_at
    FROM revocation_actions
    WHERE expires_at > $1
"#;

const DELETE_EXPIRED: &str = r#"
    DELETE FROM revocation_actions
    WHERE expires_at < $1
"#;

/// Permanent store on the `revocation_actions` table.
#[derive(Clone)]
pub struct PostgresPermanentStore {
    pool: Pool,
}

impl PostgresPermanentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// A helper function to map a `tokio_postgres::Row` to a `StoredAction`.
fn row_to_action(row: &Row) -> Result<StoredAction> {
    let key: String = row
        .try_get("action_key")
        .map_err(|_| AppError::Serialization("action_key".to_string()))?;
    let purpose: Purpose = row
        .try_get("purpose")
        .map_err(|_| AppError::Serialization("purpose".to_string()))?;
    let issued_at: DateTime<Utc> = row
        .try_get("issued_at")
        .map_err(|_| AppError::Serialization("issued_at".to_string()))?;
    let expires_at: DateTime<Utc> = row
        .try_get("expires_at")
        .map_err(|_| AppError::Serialization("expires_at".to_string()))?;

    Ok(StoredAction {
        key,
        record: ActionRecord::new(issued_at, purpose),
        expires_at,
    })
}

#[async_trait]
impl PermanentStore for PostgresPermanentStore {
    async fn put(&self, key: &str, expires_at: DateTime<Utc>, record: &ActionRecord) -> Result<()> {
        if key.is_empty() {
            return Err(AppError::InvalidArgument("key cannot be empty".to_string()));
        }

        let client = self.pool.get().await?;
        let statement = client.prepare_cached(UPSERT).await?;
        client
            .execute(
                &statement,
                &[&key, &record.purpose, &record.issued_at, &expires_at],
            )
            .await?;
        Ok(())
    }

    async fn load_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<StoredAction>> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(SELECT_UNEXPIRED).await?;
        let rows = client.query(&statement, &[&now]).await?;
        rows.iter().map(row_to_action).collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let locked: bool = transaction
            .query_one("SELECT pg_try_advisory_xact_lock($1)", &[&SWEEP_LOCK_ID])
            .await?
            .try_get(0)?;
        if !locked {
            tracing::debug!("Expiry sweep lock held by another instance");
            transaction.rollback().await?;
            return Ok(None);
        }

        let deleted = transaction.execute(DELETE_EXPIRED, &[&now]).await?;
        transaction.commit().await?;
        Ok(Some(deleted))
    }
}
