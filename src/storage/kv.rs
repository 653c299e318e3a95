use async_trait::async_trait;

use super::schema::Database;
use super::types::DatabaseError;

/// Durable key-value collaborator.
///
/// Values are opaque bytes. Keys use a dotted, versioned convention
/// (`feedbot.subscriptions.v1`) and are part of the persisted-state contract:
/// renaming one without a migration discards whatever was stored under it.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), DatabaseError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), DatabaseError>;

    /// Read `key`, pass the current value to `apply`, and store what it
    /// returns, with no other writer able to change `key` in between. That
    /// includes other processes sharing the same database file.
    ///
    /// `apply` is called exactly once, after the read succeeded. Returning
    /// `None` leaves the stored value as it is. Returns whether a value was
    /// written.
    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn for<'v> FnMut(Option<&'v [u8]>) -> Option<Vec<u8>> + Send),
    ) -> Result<bool, DatabaseError>;
}

const UPSERT_SQL: &str = r#"
    INSERT INTO plugin_kv (key, value, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

#[async_trait]
impl KvStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM plugin_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(UPSERT_SQL)
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM plugin_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        apply: &mut (dyn for<'v> FnMut(Option<&'v [u8]>) -> Option<Vec<u8>> + Send),
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;

        // IMMEDIATE takes the write lock up front, so a concurrent writer
        // waits on busy_timeout instead of failing the read-to-write upgrade.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: Result<bool, sqlx::Error> = async {
            let row: Option<(Vec<u8>,)> =
                sqlx::query_as("SELECT value FROM plugin_kv WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&mut *conn)
                    .await?;

            let Some(value) = apply(row.as_ref().map(|(value,)| value.as_slice())) else {
                return Ok(false);
            };

            sqlx::query(UPSERT_SQL)
                .bind(key)
                .bind(value)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await?;
            Ok(true)
        }
        .await;

        match result {
            Ok(written) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(key = %key, error = %rollback, "Failed to roll back kv update");
                }
                Err(e.into())
            }
        }
    }
}
