use async_trait::async_trait;
use keyforge_core::collaborators::{Notification, Notifier};
use tracing::info;

/// Writes every user notification to the log.
///
/// Stands in for a chat transport: the daemon stays runnable without one,
/// and operators still see what users would have been told.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: i64, notification: Notification) -> anyhow::Result<()> {
        match notification {
            Notification::KeyExpiring { key, expires_at } => {
                info!(user_id, key, %expires_at, "notify: key expires soon");
            }
            Notification::ReferralBonus { amount, invitee } => {
                info!(user_id, amount, invitee, "notify: referral bonus credited");
            }
            Notification::Broadcast { text } => {
                info!(user_id, text, "notify: broadcast");
            }
        }
        Ok(())
    }
}
