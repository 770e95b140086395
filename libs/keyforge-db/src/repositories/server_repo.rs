use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{Server, ServerStatus};
use crate::retry;

#[derive(Debug, Clone)]
pub struct ServerRepository {
    pool: SqlitePool,
}

impl ServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a backend server and return its id. Addresses are unique;
    /// a duplicate surfaces as [`StoreError::Conflict`].
    pub async fn add(&self, address: &str, port: u16, protocol: &str) -> Result<i64, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO servers (address, port, protocol) VALUES (?, ?, ?) RETURNING id",
            )
            .bind(address)
            .bind(i64::from(port))
            .bind(protocol)
            .fetch_one(&self.pool)
        })
        .await
    }

    pub async fn get(&self, server_id: i64) -> Result<Option<Server>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = ?")
                .bind(server_id)
                .fetch_optional(&self.pool)
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<Server>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, Server>("SELECT * FROM servers ORDER BY id").fetch_all(&self.pool)
        })
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<Server>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE status = ? ORDER BY id")
                .bind(ServerStatus::Active)
                .fetch_all(&self.pool)
        })
        .await
    }

    pub async fn set_status(&self, server_id: i64, status: ServerStatus) -> Result<(), StoreError> {
        let result = retry::once(|| {
            sqlx::query("UPDATE servers SET status = ? WHERE id = ?")
                .bind(status)
                .bind(server_id)
                .execute(&self.pool)
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// The active server holding the fewest keys, ties broken by lowest
    /// id. Expired keys still count toward load: they occupy a slot on
    /// the server until revoked.
    pub async fn least_loaded(&self) -> Result<Option<i64>, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>(
                "SELECT s.id FROM servers s \
                 LEFT JOIN keys k ON k.server_id = s.id \
                 WHERE s.status = ? \
                 GROUP BY s.id \
                 ORDER BY COUNT(k.id) ASC, s.id ASC \
                 LIMIT 1",
            )
            .bind(ServerStatus::Active)
            .fetch_optional(&self.pool)
        })
        .await
    }
}
