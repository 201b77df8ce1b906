//! Billing error taxonomy.
//!
//! Validation and not-found errors are handled at the HTTP boundary.
//! Gateway and invariant errors propagate to the orchestrating component
//! (checkout flow or renewal sweep), which decides whether to retry, defer,
//! or give up.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or placeholder configuration. Fails startup, never reaches
    /// signature verification.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad request shape or a seat-limit violation. User-correctable.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Webhook authentication failure. Logged as a security event and never
    /// retried automatically.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// Provider API down or timed out. Retryable for checkout callers;
    /// "defer to next sweep" for the renewal scheduler.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Provider rejected the request outright (not a transport failure).
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// A write would break a ledger invariant (e.g. duplicate processed
    /// event id). Treated as a logic bug; the operation is aborted with no
    /// partial effect.
    #[error("billing invariant violated: {0}")]
    Invariant(String),

    #[error("database error: {0}")]
    Database(String),

    /// Provider payload did not have the shape the adapter expects.
    #[error("malformed provider payload: {0}")]
    Payload(String),
}

impl BillingError {
    /// Whether the caller may safely retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::GatewayUnavailable(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Payload(err.to_string())
    }
}
