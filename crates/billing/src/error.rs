//! Billing error types

use keel_shared::BillingProvider;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invalid webhook payload: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Unknown billing provider: {0}")]
    UnknownProvider(String),

    #[error("Billing provider not configured: {0}")]
    ProviderNotConfigured(BillingProvider),

    #[error("Cannot create subscription without tenantId and planId")]
    MissingRequiredFields,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analytics error: {0}")]
    Analytics(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return BillingError::UniqueViolation(constraint);
            }
        }
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Analytics(err.to_string())
    }
}

impl From<keel_shared::UnknownProvider> for BillingError {
    fn from(err: keel_shared::UnknownProvider) -> Self {
        BillingError::UnknownProvider(err.0)
    }
}
