use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyforge_db::repositories::KeyRepository;
use keyforge_db::sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Notification, Notifier};
use crate::error::CoreError;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodically scans all keys and warns users whose key is on its last
/// whole day.
pub struct ExpirySweeper {
    keys: KeyRepository,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>, interval: Duration) -> Self {
        Self {
            keys: KeyRepository::new(pool),
            notifier,
            interval,
        }
    }

    /// Run the sweep loop forever. Intended for `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(0) => debug!("expiry sweep found nothing to warn about"),
                Ok(warned) => info!(warned, "expiry warnings sent"),
                Err(err) => error!(error = %err, "expiry sweep failed"),
            }
        }
    }

    /// One pass over all keys. Returns how many warnings were delivered.
    ///
    /// Every sweep revisits the whole window, so a user may hear the
    /// warning more than once while their key stays on its last day.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut warned = 0;
        for key in self.keys.list_all().await? {
            if days_remaining(key.expires_at, now) != 1 {
                continue;
            }
            let notification = Notification::KeyExpiring {
                key: key.key.clone(),
                expires_at: key.expires_at,
            };
            match self.notifier.notify(key.user_id, notification).await {
                Ok(()) => warned += 1,
                Err(err) => {
                    warn!(user_id = key.user_id, error = %err, "expiry warning delivery failed");
                }
            }
        }
        Ok(warned)
    }
}

/// Whole days until `expires_at`; negative once the key is past due.
pub fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_days()
}
