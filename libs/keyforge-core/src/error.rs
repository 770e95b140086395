use keyforge_db::StoreError;
use thiserror::Error;

/// Failure classes surfaced by the domain services.
///
/// Front-ends branch on these; [`CoreError::user_message`] gives the
/// stock reply text for the ones an end user can trigger.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The user already received their one free trial key.
    #[error("trial already claimed")]
    AlreadyClaimed,

    /// No active server is registered to place keys on.
    #[error("no servers available")]
    NoServersAvailable,

    /// Withdrawal requested with no accumulated earnings.
    #[error("nothing to withdraw")]
    NothingToWithdraw,

    /// The gateway did not confirm the payment.
    #[error("payment unconfirmed")]
    PaymentUnconfirmed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("conflicting write")]
    Conflict,

    /// Persistent-store failure; not actionable by the caller.
    #[error("storage failure")]
    Fatal(#[source] StoreError),
}

impl CoreError {
    /// Stock reply for surfacing the error to an end user in chat.
    pub fn user_message(&self) -> &'static str {
        match self {
            CoreError::AlreadyClaimed => {
                "You have already received a trial key. Repeat trials are not available."
            }
            CoreError::NoServersAvailable => {
                "No servers are available right now. Please try again later."
            }
            CoreError::NothingToWithdraw => "You have no referral earnings to withdraw yet.",
            CoreError::PaymentUnconfirmed => "Your payment has not been confirmed. Please try again.",
            CoreError::InvalidArgument(_) => {
                "That request could not be processed. Please check the input and try again."
            }
            CoreError::NotFound => "Nothing was found for that request.",
            CoreError::Conflict | CoreError::Fatal(_) => {
                "Something went wrong on our side. Please try again later."
            }
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::Conflict => CoreError::Conflict,
            other => CoreError::Fatal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_domain_errors() {
        assert!(matches!(
            CoreError::from(StoreError::NotFound),
            CoreError::NotFound
        ));
        assert!(matches!(
            CoreError::from(StoreError::Conflict),
            CoreError::Conflict
        ));
    }

    #[test]
    fn user_messages_leak_no_internals() {
        let err = CoreError::InvalidArgument("referrer_id = user_id".into());
        assert!(!err.user_message().contains("referrer_id"));
        assert!(!CoreError::Fatal(StoreError::NotFound)
            .user_message()
            .contains("storage"));
    }
}
