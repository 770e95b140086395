use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An end user, keyed by their chat platform id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    /// Chat platform identifier, unique per user.
    pub user_id: i64,
    /// Withdrawable balance, in minor currency units.
    pub balance: i64,
    /// Referral earnings not yet moved to `balance`, in minor units.
    pub earned: i64,
    pub referrer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// An issued access key, bound to one backend server for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessKey {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub server_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A backend VPN server keys can be issued against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: i64,
    pub address: String,
    pub port: i64,
    pub protocol: String,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
}

impl Server {
    pub fn is_active(&self) -> bool {
        self.status == ServerStatus::Active
    }
}

/// Whether a server takes part in key placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Active => f.write_str("active"),
            ServerStatus::Inactive => f.write_str("inactive"),
        }
    }
}

/// A purchasable plan: a price in minor units for a fixed number of days.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tariff {
    pub id: i64,
    #[sqlx(rename = "tariff")]
    pub name: String,
    /// Price in minor currency units.
    pub amount: i64,
    pub duration_days: i32,
}
