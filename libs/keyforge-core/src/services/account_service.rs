use std::collections::HashMap;
use std::sync::Arc;

use keyforge_db::repositories::UserRepository;
use keyforge_db::sqlx::SqlitePool;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::CoreError;

/// Result of moving referral earnings into the withdrawable balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Minor units moved by this withdrawal.
    pub amount: i64,
    /// Balance after the move.
    pub balance: i64,
}

/// Referral program overview for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub referrals: i64,
    pub balance: i64,
    pub earned: i64,
}

/// User accounts, referral links and referral earnings.
///
/// Balance mutations for one user are serialized behind a per-user lock;
/// the single-statement UPDATEs in the repository carry the rest of the
/// atomicity. Lock entries are dropped again once no task holds them, so
/// the map tracks users mid-mutation rather than every user ever seen.
#[derive(Clone)]
pub struct AccountService {
    users: UserRepository,
    locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl AccountService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            users: UserRepository::new(pool),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }

    async fn release_lock(&self, user_id: i64, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(&user_id) {
            // A count of one means only the map still refers to the lock.
            if Arc::strong_count(entry) == 1 {
                locks.remove(&user_id);
            }
        }
    }

    /// Make sure the user row exists.
    pub async fn ensure_user(&self, user_id: i64) -> Result<(), CoreError> {
        self.users.ensure(user_id).await?;
        Ok(())
    }

    /// Record who invited `user_id`. Re-linking replaces the previous
    /// referrer; self-referral is rejected.
    pub async fn link_referral(&self, user_id: i64, referrer_id: i64) -> Result<(), CoreError> {
        if user_id == referrer_id {
            return Err(CoreError::InvalidArgument(
                "self-referral is not allowed".into(),
            ));
        }
        self.users.ensure(user_id).await?;
        self.users.set_referrer(user_id, referrer_id).await?;
        info!(user_id, referrer_id, "referral linked");
        Ok(())
    }

    pub async fn referrer_of(&self, user_id: i64) -> Result<Option<i64>, CoreError> {
        Ok(self.users.referrer_of(user_id).await?)
    }

    /// Credit referral earnings to `user_id`. A zero credit is a no-op.
    pub async fn credit_earnings(&self, user_id: i64, amount: i64) -> Result<(), CoreError> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "credit amount must not be negative".into(),
            ));
        }
        if amount == 0 {
            return Ok(());
        }

        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;
        let credited = self.users.add_earned(user_id, amount).await;
        drop(guard);
        self.release_lock(user_id, lock).await;
        credited?;

        info!(user_id, amount, "referral earnings credited");
        Ok(())
    }

    /// Move all accumulated earnings to the withdrawable balance.
    ///
    /// Exactly one of any set of concurrent withdrawals succeeds; the
    /// rest see [`CoreError::NothingToWithdraw`].
    pub async fn withdraw(&self, user_id: i64) -> Result<Withdrawal, CoreError> {
        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;
        let outcome = self.withdraw_locked(user_id).await;
        drop(guard);
        self.release_lock(user_id, lock).await;
        outcome
    }

    async fn withdraw_locked(&self, user_id: i64) -> Result<Withdrawal, CoreError> {
        let user = self.users.get(user_id).await?.ok_or(CoreError::NotFound)?;
        if user.earned <= 0 {
            return Err(CoreError::NothingToWithdraw);
        }
        if self.users.settle_earned(user_id).await? == 0 {
            return Err(CoreError::NothingToWithdraw);
        }
        let settled = self.users.get(user_id).await?.ok_or(CoreError::NotFound)?;

        info!(
            user_id,
            amount = user.earned,
            balance = settled.balance,
            "earnings withdrawn"
        );
        Ok(Withdrawal {
            amount: user.earned,
            balance: settled.balance,
        })
    }

    pub async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, CoreError> {
        let user = self.users.get(user_id).await?.ok_or(CoreError::NotFound)?;
        let referrals = self.users.count_referrals(user_id).await?;
        Ok(ReferralSummary {
            referrals,
            balance: user.balance,
            earned: user.earned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn withdraw_moves_earned_to_balance() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(10).await.unwrap();
        accounts.credit_earnings(10, 9000).await.unwrap();

        let withdrawal = accounts.withdraw(10).await.unwrap();
        assert_eq!(
            withdrawal,
            Withdrawal {
                amount: 9000,
                balance: 9000
            }
        );

        // A second withdrawal has nothing left to move.
        assert!(matches!(
            accounts.withdraw(10).await,
            Err(CoreError::NothingToWithdraw)
        ));
    }

    #[tokio::test]
    async fn withdraw_with_no_earnings_is_typed() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(10).await.unwrap();

        assert!(matches!(
            accounts.withdraw(10).await,
            Err(CoreError::NothingToWithdraw)
        ));
        assert!(matches!(
            accounts.withdraw(404).await,
            Err(CoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_withdrawals_settle_once() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(5).await.unwrap();
        accounts.credit_earnings(5, 12000).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let accounts = accounts.clone();
            handles.push(tokio::spawn(async move { accounts.withdraw(5).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(withdrawal) => {
                    succeeded += 1;
                    assert_eq!(withdrawal.amount, 12000);
                }
                Err(CoreError::NothingToWithdraw) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(succeeded, 1);

        let summary = accounts.referral_summary(5).await.unwrap();
        assert_eq!(summary.balance, 12000);
        assert_eq!(summary.earned, 0);
        assert!(accounts.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn self_referral_is_rejected() {
        let accounts = AccountService::new(testing::pool().await);
        assert!(matches!(
            accounts.link_referral(3, 3).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn relink_overwrites_referrer() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(1).await.unwrap();
        accounts.ensure_user(2).await.unwrap();

        accounts.link_referral(9, 1).await.unwrap();
        assert_eq!(accounts.referrer_of(9).await.unwrap(), Some(1));

        accounts.link_referral(9, 2).await.unwrap();
        assert_eq!(accounts.referrer_of(9).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn summary_counts_invitees() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(1).await.unwrap();
        accounts.link_referral(2, 1).await.unwrap();
        accounts.link_referral(3, 1).await.unwrap();

        let summary = accounts.referral_summary(1).await.unwrap();
        assert_eq!(summary.referrals, 2);
        assert_eq!(summary.balance, 0);
        assert_eq!(summary.earned, 0);
    }

    #[tokio::test]
    async fn negative_credits_are_rejected() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(1).await.unwrap();

        assert!(matches!(
            accounts.credit_earnings(1, -500).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn zero_credits_are_a_no_op() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(1).await.unwrap();

        accounts.credit_earnings(1, 0).await.unwrap();

        let summary = accounts.referral_summary(1).await.unwrap();
        assert_eq!(summary.earned, 0);
        assert_eq!(summary.balance, 0);
    }

    #[tokio::test]
    async fn idle_user_locks_are_evicted() {
        let accounts = AccountService::new(testing::pool().await);
        accounts.ensure_user(1).await.unwrap();
        accounts.ensure_user(2).await.unwrap();

        accounts.credit_earnings(1, 500).await.unwrap();
        accounts.credit_earnings(2, 500).await.unwrap();
        accounts.withdraw(1).await.unwrap();
        assert!(accounts.locks.lock().await.is_empty());

        // Error paths release their entry too.
        assert!(matches!(
            accounts.withdraw(404).await,
            Err(CoreError::NotFound)
        ));
        assert!(accounts.locks.lock().await.is_empty());
    }
}
