//! Seams to the outside world: chat delivery, payments, server agents.
//!
//! The services depend on these traits only; the daemon (or a chat
//! front-end embedding the library) decides the implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyforge_db::models::Server;
use serde::{Deserialize, Serialize};

/// A message the service wants delivered to a user's chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The key has exactly one whole day of validity left.
    KeyExpiring {
        key: String,
        expires_at: DateTime<Utc>,
    },
    /// A referral bonus was credited for a paid purchase by `invitee`.
    ReferralBonus { amount: i64, invitee: i64 },
    /// Operator announcement.
    Broadcast { text: String },
}

/// Outbound delivery channel to users.
///
/// Deliveries must never block domain operations: callers log failures
/// and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, notification: Notification) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub id: String,
    pub confirmation_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Payment provider seam.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment and return its id plus the confirmation URL to
    /// show the user.
    async fn create_payment(&self, amount: i64, description: &str) -> Result<PaymentHandle>;

    /// Current status of a previously created payment.
    async fn check_status(&self, payment_id: &str) -> Result<PaymentStatus>;
}

/// Gateway that approves everything; stands in until a real provider is
/// wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment(&self, _amount: i64, _description: &str) -> Result<PaymentHandle> {
        Ok(PaymentHandle {
            id: "test_payment_id".to_string(),
            confirmation_url: "https://example.com/payment".to_string(),
        })
    }

    async fn check_status(&self, _payment_id: &str) -> Result<PaymentStatus> {
        Ok(PaymentStatus::Succeeded)
    }
}

/// Pushes an issued key to the management agent of a backend server.
#[async_trait]
pub trait ServerProvisioner: Send + Sync {
    async fn configure(&self, server: &Server, key: &str) -> Result<()>;
}

/// Provisioner for deployments where servers are configured out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl ServerProvisioner for NoopProvisioner {
    async fn configure(&self, _server: &Server, _key: &str) -> Result<()> {
        Ok(())
    }
}
