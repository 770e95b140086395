use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyforge_db::StoreError;
use keyforge_db::models::Server;
use keyforge_db::repositories::{KeyRepository, ServerRepository, TariffRepository};
use keyforge_db::sqlx::SqlitePool;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    Notification, Notifier, PaymentGateway, PaymentStatus, ServerProvisioner,
};
use crate::error::CoreError;
use crate::keygen;
use crate::services::account_service::AccountService;

/// Days of access granted by the free trial.
pub const TRIAL_DAYS: i64 = 1;

/// Share of a paid purchase credited to the referrer, in percent.
pub const REFERRAL_RATE_PERCENT: i64 = 30;

/// Backoff between provisioning attempts, after the initial one.
const PROVISION_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(2),
    Duration::from_secs(8),
];

/// How far an issuance request got; logged when a request stops mid-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Requested,
    EligibilityChecked,
    ServerSelected,
    KeyGenerated,
    Recorded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Requested => "requested",
            Stage::EligibilityChecked => "eligibility_checked",
            Stage::ServerSelected => "server_selected",
            Stage::KeyGenerated => "key_generated",
            Stage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// A key handed to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedKey {
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub server_id: i64,
}

/// Orchestrates key issuance end to end: eligibility, server choice,
/// recording, referral credit and provisioning dispatch.
#[derive(Clone)]
pub struct IssuanceService {
    keys: KeyRepository,
    servers: ServerRepository,
    tariffs: TariffRepository,
    accounts: AccountService,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    provisioner: Arc<dyn ServerProvisioner>,
    key_source: Arc<dyn Fn() -> String + Send + Sync>,
    // Spans the eligibility check through the key insert so concurrent
    // requests cannot both pass the trial gate.
    issue_lock: Arc<Mutex<()>>,
}

impl IssuanceService {
    pub fn new(
        pool: SqlitePool,
        accounts: AccountService,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        provisioner: Arc<dyn ServerProvisioner>,
    ) -> Self {
        Self::with_key_source(
            pool,
            accounts,
            payments,
            notifier,
            provisioner,
            Arc::new(|| keygen::new_key()),
        )
    }

    fn with_key_source(
        pool: SqlitePool,
        accounts: AccountService,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        provisioner: Arc<dyn ServerProvisioner>,
        key_source: Arc<dyn Fn() -> String + Send + Sync>,
    ) -> Self {
        Self {
            keys: KeyRepository::new(pool.clone()),
            servers: ServerRepository::new(pool.clone()),
            tariffs: TariffRepository::new(pool),
            accounts,
            payments,
            notifier,
            provisioner,
            key_source,
            issue_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Issue the one-time free trial key.
    ///
    /// Any existing key row, expired or not, makes the user ineligible;
    /// key rows only leave the ledger through an administrative block.
    pub async fn issue_trial(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedKey, CoreError> {
        self.accounts.ensure_user(user_id).await?;

        let guard = self.issue_lock.lock().await;
        let mut stage = Stage::Requested;
        let outcome = self.trial_locked(user_id, now, &mut stage).await;
        drop(guard);

        match outcome {
            Ok((issued, server)) => {
                info!(user_id, server_id = server.id, expires_at = %issued.expires_at, "trial key issued");
                self.dispatch_provisioning(server, issued.key.clone());
                Ok(issued)
            }
            Err(err) => {
                log_failure("trial", user_id, stage, &err);
                Err(err)
            }
        }
    }

    async fn trial_locked(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        stage: &mut Stage,
    ) -> Result<(IssuedKey, Server), CoreError> {
        if self.keys.has_any(user_id).await? {
            return Err(CoreError::AlreadyClaimed);
        }
        *stage = Stage::EligibilityChecked;
        self.place_key(user_id, TRIAL_DAYS, now, stage).await
    }

    /// Issue a paid key after confirming payment with the gateway.
    ///
    /// The referral credit after a successful issue is best-effort: a
    /// failure there is logged and never unwinds the issued key.
    pub async fn issue_paid(
        &self,
        user_id: i64,
        days: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedKey, CoreError> {
        if days <= 0 {
            return Err(CoreError::InvalidArgument(
                "access duration must be positive".into(),
            ));
        }
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "amount must not be negative".into(),
            ));
        }
        self.accounts.ensure_user(user_id).await?;
        self.confirm_payment(user_id, amount, days).await?;

        let guard = self.issue_lock.lock().await;
        // Paid issuance has no trial gate.
        let mut stage = Stage::EligibilityChecked;
        let outcome = self.place_key(user_id, days, now, &mut stage).await;
        drop(guard);

        let (issued, server) = match outcome {
            Ok(placed) => placed,
            Err(err) => {
                log_failure("paid", user_id, stage, &err);
                return Err(err);
            }
        };

        info!(user_id, server_id = server.id, days, amount, "paid key issued");
        self.dispatch_provisioning(server, issued.key.clone());
        self.credit_referrer(user_id, amount).await;
        Ok(issued)
    }

    /// Resolve a tariff by name and issue a paid key for it.
    pub async fn purchase(
        &self,
        user_id: i64,
        tariff: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedKey, CoreError> {
        let Some(tariff) = self.tariffs.get(tariff).await? else {
            return Err(CoreError::NotFound);
        };
        self.issue_paid(user_id, i64::from(tariff.duration_days), tariff.amount, now)
            .await
    }

    /// Admin grant: a key of arbitrary duration, no payment and no trial
    /// gate.
    pub async fn give_key(
        &self,
        user_id: i64,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedKey, CoreError> {
        if days <= 0 {
            return Err(CoreError::InvalidArgument(
                "access duration must be positive".into(),
            ));
        }
        self.accounts.ensure_user(user_id).await?;

        let guard = self.issue_lock.lock().await;
        let mut stage = Stage::EligibilityChecked;
        let outcome = self.place_key(user_id, days, now, &mut stage).await;
        drop(guard);

        match outcome {
            Ok((issued, server)) => {
                info!(user_id, server_id = server.id, days, "key granted");
                self.dispatch_provisioning(server, issued.key.clone());
                Ok(issued)
            }
            Err(err) => {
                log_failure("grant", user_id, stage, &err);
                Err(err)
            }
        }
    }

    /// Pick the least-loaded active server, generate a key and record it.
    async fn place_key(
        &self,
        user_id: i64,
        days: i64,
        now: DateTime<Utc>,
        stage: &mut Stage,
    ) -> Result<(IssuedKey, Server), CoreError> {
        // Checked before any storage work: `days` comes straight from
        // admin or tariff input.
        let expires_at = keygen::expiry(now, days).ok_or_else(|| {
            CoreError::InvalidArgument("access duration is out of range".into())
        })?;

        let Some(server_id) = self.servers.least_loaded().await? else {
            return Err(CoreError::NoServersAvailable);
        };
        let server = self
            .servers
            .get(server_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        *stage = Stage::ServerSelected;

        let key = (self.key_source)();
        *stage = Stage::KeyGenerated;

        let key = self.record(user_id, key, expires_at, server_id).await?;
        *stage = Stage::Recorded;

        Ok((
            IssuedKey {
                key,
                expires_at,
                server_id,
            },
            server,
        ))
    }

    /// Insert the key row; on a key-string collision generate one
    /// replacement before giving up.
    async fn record(
        &self,
        user_id: i64,
        key: String,
        expires_at: DateTime<Utc>,
        server_id: i64,
    ) -> Result<String, CoreError> {
        match self.keys.insert(user_id, &key, expires_at, server_id).await {
            Ok(()) => Ok(key),
            Err(StoreError::Conflict) => {
                warn!(user_id, "access key collided, regenerating");
                let replacement = (self.key_source)();
                match self
                    .keys
                    .insert(user_id, &replacement, expires_at, server_id)
                    .await
                {
                    Ok(()) => Ok(replacement),
                    Err(StoreError::Conflict) => Err(CoreError::Fatal(StoreError::Conflict)),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn confirm_payment(&self, user_id: i64, amount: i64, days: i64) -> Result<(), CoreError> {
        let description = format!("VPN access, {days} days");
        let handle = match self.payments.create_payment(amount, &description).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(user_id, amount, error = %err, "payment creation failed");
                return Err(CoreError::PaymentUnconfirmed);
            }
        };

        match self.payments.check_status(&handle.id).await {
            Ok(PaymentStatus::Succeeded) => {
                debug!(user_id, payment_id = %handle.id, "payment confirmed");
                Ok(())
            }
            Ok(status) => {
                info!(user_id, payment_id = %handle.id, ?status, "payment not confirmed");
                Err(CoreError::PaymentUnconfirmed)
            }
            Err(err) => {
                warn!(user_id, payment_id = %handle.id, error = %err, "payment status check failed");
                Err(CoreError::PaymentUnconfirmed)
            }
        }
    }

    /// Credit the referrer their share of a paid purchase and tell them.
    /// Never fails the purchase: the key is already recorded.
    async fn credit_referrer(&self, user_id: i64, amount: i64) {
        let referrer = match self.accounts.referrer_of(user_id).await {
            Ok(Some(referrer)) => referrer,
            Ok(None) => return,
            Err(err) => {
                warn!(user_id, error = %err, "referrer lookup failed, skipping referral credit");
                return;
            }
        };

        let bonus = amount * REFERRAL_RATE_PERCENT / 100;
        if bonus == 0 {
            return;
        }

        match self.accounts.credit_earnings(referrer, bonus).await {
            Ok(()) => {
                info!(user_id, referrer, bonus, "referral bonus credited");
                let notification = Notification::ReferralBonus {
                    amount: bonus,
                    invitee: user_id,
                };
                if let Err(err) = self.notifier.notify(referrer, notification).await {
                    warn!(referrer, error = %err, "referral bonus notification failed");
                }
            }
            Err(err) => {
                warn!(user_id, referrer, bonus, error = %err, "referral credit failed, issued key stands");
            }
        }
    }

    /// Push the key to the server's agent on a background task; issuance
    /// never waits on provisioning.
    fn dispatch_provisioning(&self, server: Server, key: String) {
        let provisioner = Arc::clone(&self.provisioner);
        tokio::spawn(async move {
            if let Err(err) =
                provision_with_retry(provisioner.as_ref(), &server, &key, &PROVISION_BACKOFF).await
            {
                error!(server_id = server.id, address = %server.address, error = %err, "provisioning failed, key remains recorded");
            }
        });
    }
}

/// Run `provisioner.configure`, sleeping through `backoff` between
/// attempts. The schedule length bounds the number of retries.
pub(crate) async fn provision_with_retry(
    provisioner: &dyn ServerProvisioner,
    server: &Server,
    key: &str,
    backoff: &[Duration],
) -> anyhow::Result<()> {
    let mut attempt = 0;
    loop {
        match provisioner.configure(server, key).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < backoff.len() => {
                warn!(server_id = server.id, attempt, error = %err, "provisioning attempt failed, retrying");
                tokio::time::sleep(backoff[attempt]).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn log_failure(flow: &str, user_id: i64, stage: Stage, err: &CoreError) {
    match err {
        CoreError::AlreadyClaimed
        | CoreError::NoServersAvailable
        | CoreError::PaymentUnconfirmed
        | CoreError::NotFound
        | CoreError::InvalidArgument(_) => {
            info!(user_id, flow, %stage, error = %err, "issuance refused");
        }
        _ => {
            error!(user_id, flow, %stage, error = %err, "issuance failed");
        }
    }
}
