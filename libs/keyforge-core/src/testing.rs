//! Shared fixtures for service tests.

use anyhow::Result;
use async_trait::async_trait;
use keyforge_db::connect_memory;
use keyforge_db::sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::collaborators::{Notification, Notifier, PaymentGateway, PaymentHandle, PaymentStatus};

pub async fn pool() -> SqlitePool {
    connect_memory().await.unwrap()
}

/// Notifier that remembers everything it was asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, Notification)>>,
}

impl RecordingNotifier {
    pub async fn deliveries(&self) -> Vec<(i64, Notification)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: i64, notification: Notification) -> Result<()> {
        self.sent.lock().await.push((user_id, notification));
        Ok(())
    }
}

/// Notifier whose deliveries always fail.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _user_id: i64, _notification: Notification) -> Result<()> {
        Err(anyhow::anyhow!("chat unreachable"))
    }
}

/// Gateway that never confirms a payment.
pub struct DecliningGateway;

#[async_trait]
impl PaymentGateway for DecliningGateway {
    async fn create_payment(&self, _amount: i64, _description: &str) -> Result<PaymentHandle> {
        Ok(PaymentHandle {
            id: "declined_payment_id".to_string(),
            confirmation_url: "https://example.com/payment".to_string(),
        })
    }

    async fn check_status(&self, _payment_id: &str) -> Result<PaymentStatus> {
        Ok(PaymentStatus::Failed)
    }
}
