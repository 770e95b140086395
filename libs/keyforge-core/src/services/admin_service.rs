use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyforge_db::models::{Server, ServerStatus, Tariff};
use keyforge_db::repositories::{
    KeyRepository, ServerRepository, TariffRepository, UserRepository,
};
use keyforge_db::sqlx::SqlitePool;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collaborators::{Notification, Notifier};
use crate::error::CoreError;
use crate::services::issuance_service::{IssuanceService, IssuedKey};
use crate::session::AdminCommand;

/// Headline counters for the stats panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub users: i64,
    pub keys: i64,
    pub active_servers: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// What an executed admin command did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdminOutcome {
    KeyIssued { user_id: i64, issued: IssuedKey },
    UserBlocked { user_id: i64, revoked_keys: u64 },
    BroadcastSent(BroadcastReport),
    ServerAdded { server_id: i64 },
    ServerRemoved { server_id: i64 },
    PriceUpdated { tariff: String, amount: i64 },
}

/// Executes admin commands against the registry and the user base.
#[derive(Clone)]
pub struct AdminService {
    users: UserRepository,
    keys: KeyRepository,
    servers: ServerRepository,
    tariffs: TariffRepository,
    issuance: IssuanceService,
    notifier: Arc<dyn Notifier>,
}

impl AdminService {
    pub fn new(pool: SqlitePool, issuance: IssuanceService, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            keys: KeyRepository::new(pool.clone()),
            servers: ServerRepository::new(pool.clone()),
            tariffs: TariffRepository::new(pool),
            issuance,
            notifier,
        }
    }

    /// Run one parsed admin command.
    pub async fn execute(
        &self,
        command: AdminCommand,
        now: DateTime<Utc>,
    ) -> Result<AdminOutcome, CoreError> {
        match command {
            AdminCommand::GiveKey { user_id, days } => {
                let issued = self.issuance.give_key(user_id, days, now).await?;
                Ok(AdminOutcome::KeyIssued { user_id, issued })
            }
            AdminCommand::BlockUser { user_id } => {
                let revoked_keys = self.block_user(user_id).await?;
                Ok(AdminOutcome::UserBlocked {
                    user_id,
                    revoked_keys,
                })
            }
            AdminCommand::Broadcast { text } => {
                let report = self.broadcast(&text).await?;
                Ok(AdminOutcome::BroadcastSent(report))
            }
            AdminCommand::AddServer {
                address,
                port,
                protocol,
            } => {
                let server_id = self.add_server(&address, port, &protocol).await?;
                Ok(AdminOutcome::ServerAdded { server_id })
            }
            AdminCommand::RemoveServer { server_id } => {
                self.set_server_status(server_id, ServerStatus::Inactive)
                    .await?;
                Ok(AdminOutcome::ServerRemoved { server_id })
            }
            AdminCommand::EditPrice { tariff, amount } => {
                self.update_price(&tariff, amount).await?;
                Ok(AdminOutcome::PriceUpdated { tariff, amount })
            }
        }
    }

    /// Revoke every key the user holds. Returns how many were removed.
    pub async fn block_user(&self, user_id: i64) -> Result<u64, CoreError> {
        let revoked = self.keys.revoke_all_for_user(user_id).await?;
        info!(user_id, revoked, "user blocked, keys revoked");
        Ok(revoked)
    }

    /// Send `text` to every known user. Per-user delivery failures are
    /// counted, not fatal.
    pub async fn broadcast(&self, text: &str) -> Result<BroadcastReport, CoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::InvalidArgument(
                "broadcast text must not be empty".into(),
            ));
        }

        let mut report = BroadcastReport {
            delivered: 0,
            failed: 0,
        };
        for user_id in self.users.all_user_ids().await? {
            let notification = Notification::Broadcast {
                text: text.to_owned(),
            };
            match self.notifier.notify(user_id, notification).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(user_id, error = %err, "broadcast delivery failed");
                }
            }
        }
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "broadcast finished"
        );
        Ok(report)
    }

    /// Register a server; it joins load balancing immediately.
    pub async fn add_server(
        &self,
        address: &str,
        port: u16,
        protocol: &str,
    ) -> Result<i64, CoreError> {
        let address = address.trim();
        let protocol = protocol.trim();
        if address.is_empty() {
            return Err(CoreError::InvalidArgument(
                "server address must not be empty".into(),
            ));
        }
        if port == 0 {
            return Err(CoreError::InvalidArgument(
                "server port must be positive".into(),
            ));
        }
        if protocol.is_empty() {
            return Err(CoreError::InvalidArgument(
                "server protocol must not be empty".into(),
            ));
        }

        let server_id = self.servers.add(address, port, protocol).await?;
        info!(server_id, address, port, protocol, "server registered");
        Ok(server_id)
    }

    /// Flip a server's status. Inactive servers keep their rows and their
    /// issued keys but receive no new ones.
    pub async fn set_server_status(
        &self,
        server_id: i64,
        status: ServerStatus,
    ) -> Result<(), CoreError> {
        self.servers.set_status(server_id, status).await?;
        info!(server_id, %status, "server status changed");
        Ok(())
    }

    pub async fn list_servers(&self) -> Result<Vec<Server>, CoreError> {
        Ok(self.servers.list().await?)
    }

    /// Change what a tariff charges. Only seeded tariffs can be edited.
    pub async fn update_price(&self, tariff: &str, amount: i64) -> Result<(), CoreError> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "price must not be negative".into(),
            ));
        }
        self.tariffs.set_amount(tariff, amount).await?;
        info!(tariff, amount, "tariff price updated");
        Ok(())
    }

    pub async fn list_tariffs(&self) -> Result<Vec<Tariff>, CoreError> {
        Ok(self.tariffs.list().await?)
    }

    pub async fn stats(&self) -> Result<ServiceStats, CoreError> {
        let users = self.users.count().await?;
        let keys = self.keys.count().await?;
        let active_servers = self.servers.list_active().await?.len() as i64;
        Ok(ServiceStats {
            users,
            keys,
            active_servers,
        })
    }
}
