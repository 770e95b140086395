//! Admin follow-up input tracking.
//!
//! Several admin operations ask for a typed reply ("enter the user id").
//! Every admin is either idle or awaiting exactly one kind of input:
//! `begin` opens a pending request, `submit` consumes it whether parsing
//! succeeds or not, and requests silently lapse after a TTL.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Default lifetime of a pending admin input request, in seconds.
pub const DEFAULT_INPUT_TTL_SECS: i64 = 300;

/// What the admin is expected to type next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// `<user_id> <days>`
    GiveKey,
    /// `<user_id>`
    BlockUser,
    /// Free text to send to every user.
    Broadcast,
    /// `<address> <port> <protocol>`
    AddServer,
    /// `<server_id>`
    RemoveServer,
    /// `<tariff> <price>`, price in major units (`350` or `350.50`).
    EditPrice,
}

/// A fully parsed admin operation, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminCommand {
    GiveKey { user_id: i64, days: i64 },
    BlockUser { user_id: i64 },
    Broadcast { text: String },
    AddServer { address: String, port: u16, protocol: String },
    RemoveServer { server_id: i64 },
    EditPrice { tariff: String, amount: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no input is pending for this admin")]
    NothingPending,

    #[error("the pending input request expired")]
    Expired,

    #[error("invalid input: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: InputKind,
    expires_at: DateTime<Utc>,
}

/// Tracks which admins the service is waiting on for follow-up input.
#[derive(Debug)]
pub struct SessionManager {
    ttl: Duration,
    pending: Mutex<HashMap<i64, Pending>>,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::seconds(DEFAULT_INPUT_TTL_SECS))
    }

    /// Start awaiting `kind` from `admin_id`, replacing any previous
    /// pending request. Requests that lapsed without a reply are dropped
    /// at the same time.
    pub async fn begin(&self, admin_id: i64, kind: InputKind, now: DateTime<Utc>) {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| now < p.expires_at);
        pending.insert(
            admin_id,
            Pending {
                kind,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop any pending request. Returns whether one existed.
    pub async fn cancel(&self, admin_id: i64) -> bool {
        self.pending.lock().await.remove(&admin_id).is_some()
    }

    /// What, if anything, the admin is currently being asked for.
    pub async fn awaiting(&self, admin_id: i64, now: DateTime<Utc>) -> Option<InputKind> {
        let pending = self.pending.lock().await;
        pending
            .get(&admin_id)
            .filter(|p| now < p.expires_at)
            .map(|p| p.kind)
    }

    /// Consume the pending request with the admin's reply.
    ///
    /// The request is cleared whether parsing succeeds or not; on a parse
    /// error the admin restarts the flow from the menu.
    pub async fn submit(
        &self,
        admin_id: i64,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<AdminCommand, SessionError> {
        let entry = self.pending.lock().await.remove(&admin_id);
        let Some(entry) = entry else {
            return Err(SessionError::NothingPending);
        };
        if now >= entry.expires_at {
            return Err(SessionError::Expired);
        }
        parse_input(entry.kind, text)
    }
}

fn parse_input(kind: InputKind, text: &str) -> Result<AdminCommand, SessionError> {
    let text = text.trim();
    match kind {
        InputKind::GiveKey => {
            let (user_id, days) = split2(text)?;
            let user_id = parse_i64(user_id, "user id")?;
            let days = parse_i64(days, "days")?;
            if days <= 0 {
                return Err(SessionError::Invalid("days must be positive".into()));
            }
            Ok(AdminCommand::GiveKey { user_id, days })
        }
        InputKind::BlockUser => Ok(AdminCommand::BlockUser {
            user_id: parse_i64(text, "user id")?,
        }),
        InputKind::Broadcast => {
            if text.is_empty() {
                return Err(SessionError::Invalid("broadcast text is empty".into()));
            }
            Ok(AdminCommand::Broadcast {
                text: text.to_string(),
            })
        }
        InputKind::AddServer => {
            let mut parts = text.split_whitespace();
            let (Some(address), Some(port), Some(protocol), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(SessionError::Invalid(
                    "expected: <address> <port> <protocol>".into(),
                ));
            };
            let port = parse_port(port)?;
            Ok(AdminCommand::AddServer {
                address: address.to_string(),
                port,
                protocol: protocol.to_string(),
            })
        }
        InputKind::RemoveServer => Ok(AdminCommand::RemoveServer {
            server_id: parse_i64(text, "server id")?,
        }),
        InputKind::EditPrice => {
            let (tariff, price) = split2(text)?;
            let amount = parse_amount(price).ok_or_else(|| {
                SessionError::Invalid("price must be an amount like 350 or 350.50".into())
            })?;
            Ok(AdminCommand::EditPrice {
                tariff: tariff.to_string(),
                amount,
            })
        }
    }
}

fn split2(text: &str) -> Result<(&str, &str), SessionError> {
    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((a, b)),
        _ => Err(SessionError::Invalid("expected exactly two values".into())),
    }
}

fn parse_i64(text: &str, what: &str) -> Result<i64, SessionError> {
    text.parse()
        .map_err(|_| SessionError::Invalid(format!("{what} must be a number")))
}

fn parse_port(text: &str) -> Result<u16, SessionError> {
    match text.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(SessionError::Invalid("port must be 1-65535".into())),
    }
}

/// Parse a decimal price in major units into minor units. At most two
/// fractional digits; negative amounts are rejected.
pub fn parse_amount(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('-') {
        return None;
    }
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        2 => frac.parse::<i64>().ok()?,
        _ => return None,
    };
    if cents < 0 {
        return None;
    }
    whole.checked_mul(100)?.checked_add(cents)
}
