use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::AccessKey;
use crate::retry;

#[derive(Debug, Clone)]
pub struct KeyRepository {
    pool: SqlitePool,
}

impl KeyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the user ever received a key, expired ones included.
    pub async fn has_any(&self, user_id: i64) -> Result<bool, StoreError> {
        let count = retry::once(|| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM keys WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
        })
        .await?;
        Ok(count > 0)
    }

    /// Record an issued key. The key string is unique across all users;
    /// a duplicate surfaces as [`StoreError::Conflict`].
    pub async fn insert(
        &self,
        user_id: i64,
        key: &str,
        expires_at: DateTime<Utc>,
        server_id: i64,
    ) -> Result<(), StoreError> {
        retry::once(|| {
            sqlx::query("INSERT INTO keys (user_id, key, expires_at, server_id) VALUES (?, ?, ?, ?)")
                .bind(user_id)
                .bind(key)
                .bind(expires_at)
                .bind(server_id)
                .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<AccessKey>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, AccessKey>("SELECT * FROM keys WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
        })
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<AccessKey>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, AccessKey>("SELECT * FROM keys ORDER BY id").fetch_all(&self.pool)
        })
        .await
    }

    /// Delete every key the user holds. Returns how many were removed.
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let result = retry::once(|| {
            sqlx::query("DELETE FROM keys WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
        })
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM keys").fetch_one(&self.pool)
        })
        .await
    }
}
