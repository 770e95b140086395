use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::User;
use crate::retry;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the user row if it does not exist yet.
    pub async fn ensure(&self, user_id: i64) -> Result<(), StoreError> {
        retry::once(|| {
            sqlx::query("INSERT OR IGNORE INTO users (user_id) VALUES (?)")
                .bind(user_id)
                .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        retry::once(|| {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
        })
        .await
    }

    /// Point `user_id` at a referrer, replacing any previous link.
    pub async fn set_referrer(&self, user_id: i64, referrer_id: i64) -> Result<(), StoreError> {
        let result = retry::once(|| {
            sqlx::query("UPDATE users SET referrer_id = ? WHERE user_id = ?")
                .bind(referrer_id)
                .bind(user_id)
                .execute(&self.pool)
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn referrer_of(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        let row = retry::once(|| {
            sqlx::query_scalar::<_, Option<i64>>("SELECT referrer_id FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
        })
        .await?;
        Ok(row.flatten())
    }

    /// Add `amount` minor units to the user's referral earnings.
    pub async fn add_earned(&self, user_id: i64, amount: i64) -> Result<(), StoreError> {
        let result = retry::once(|| {
            sqlx::query("UPDATE users SET earned = earned + ? WHERE user_id = ?")
                .bind(amount)
                .bind(user_id)
                .execute(&self.pool)
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Move all accumulated earnings into the withdrawable balance.
    ///
    /// Both assignments read the pre-update row, so the move happens
    /// atomically in one statement. Returns the number of rows changed;
    /// 0 means there was nothing to move.
    pub async fn settle_earned(&self, user_id: i64) -> Result<u64, StoreError> {
        let result = retry::once(|| {
            sqlx::query(
                "UPDATE users SET balance = balance + earned, earned = 0 \
                 WHERE user_id = ? AND earned > 0",
            )
            .bind(user_id)
            .execute(&self.pool)
        })
        .await?;
        Ok(result.rows_affected())
    }

    /// How many users name `referrer_id` as their referrer.
    pub async fn count_referrals(&self, referrer_id: i64) -> Result<i64, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE referrer_id = ?")
                .bind(referrer_id)
                .fetch_one(&self.pool)
        })
        .await
    }

    pub async fn all_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>("SELECT user_id FROM users ORDER BY id")
                .fetch_all(&self.pool)
        })
        .await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        retry::once(|| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(&self.pool)
        })
        .await
    }
}
