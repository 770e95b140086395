use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::Tariff;
use crate::retry;

#[derive(Debug, Clone)]
pub struct TariffRepository {
    pool: SqlitePool,
}

impl TariffRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Tariff>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, Tariff>("SELECT * FROM prices WHERE tariff = ?")
                .bind(name)
                .fetch_optional(&self.pool)
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<Tariff>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, Tariff>("SELECT * FROM prices ORDER BY duration_days")
                .fetch_all(&self.pool)
        })
        .await
    }

    /// Change the price of an existing tariff. Unknown tariffs are not
    /// created implicitly.
    pub async fn set_amount(&self, name: &str, amount: i64) -> Result<(), StoreError> {
        let result = retry::once(|| {
            sqlx::query("UPDATE prices SET amount = ? WHERE tariff = ?")
                .bind(amount)
                .bind(name)
                .execute(&self.pool)
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
