//! Billing configuration loaded from the environment

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";
pub const DEFAULT_ANALYTICS_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_EVENT_RETENTION_DAYS: i64 = 90;
/// Vendors redeliver for several days; pruning sooner would reopen the duplicate window
pub const MIN_EVENT_RETENTION_DAYS: i64 = 7;
/// Ten years; larger values push the prune cutoff out of the representable date range
pub const MAX_EVENT_RETENTION_DAYS: i64 = 3_650;

/// Vendor secrets, analytics and ledger retention settings
#[derive(Clone)]
pub struct BillingConfig {
    /// HMAC secret for Polar webhooks (`POLAR_WEBHOOK_SECRET`)
    pub polar_webhook_secret: Option<String>,
    /// Expected Authorization header value for RevenueCat webhooks (`REVENUECAT_WEBHOOK_AUTH`)
    pub revenuecat_webhook_auth: Option<String>,
    pub posthog_api_key: Option<String>,
    pub posthog_host: String,
    pub analytics_timeout: Duration,
    pub event_retention_days: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            polar_webhook_secret: None,
            revenuecat_webhook_auth: None,
            posthog_api_key: None,
            posthog_host: DEFAULT_POSTHOG_HOST.to_string(),
            analytics_timeout: Duration::from_millis(DEFAULT_ANALYTICS_TIMEOUT_MS),
            event_retention_days: DEFAULT_EVENT_RETENTION_DAYS,
        }
    }
}

// Secrets stay out of logs
impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingConfig")
            .field("polar_webhook_secret", &self.polar_webhook_secret.is_some())
            .field("revenuecat_webhook_auth", &self.revenuecat_webhook_auth.is_some())
            .field("posthog_api_key", &self.posthog_api_key.is_some())
            .field("posthog_host", &self.posthog_host)
            .field("analytics_timeout", &self.analytics_timeout)
            .field("event_retention_days", &self.event_retention_days)
            .finish()
    }
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        let analytics_timeout_ms = match env_opt("ANALYTICS_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                BillingError::Config(format!("ANALYTICS_TIMEOUT_MS must be an integer: {}", e))
            })?,
            None => DEFAULT_ANALYTICS_TIMEOUT_MS,
        };

        let retention_days = match env_opt("WEBHOOK_EVENT_RETENTION_DAYS") {
            Some(raw) => raw.parse::<i64>().map_err(|e| {
                BillingError::Config(format!(
                    "WEBHOOK_EVENT_RETENTION_DAYS must be an integer: {}",
                    e
                ))
            })?,
            None => DEFAULT_EVENT_RETENTION_DAYS,
        };

        let config = Self {
            polar_webhook_secret: env_opt("POLAR_WEBHOOK_SECRET"),
            revenuecat_webhook_auth: env_opt("REVENUECAT_WEBHOOK_AUTH"),
            posthog_api_key: env_opt("POSTHOG_API_KEY"),
            posthog_host: env_opt("POSTHOG_HOST")
                .unwrap_or_else(|| DEFAULT_POSTHOG_HOST.to_string()),
            analytics_timeout: Duration::from_millis(analytics_timeout_ms),
            event_retention_days: 0,
        }
        .with_retention_days(retention_days);

        Ok(config)
    }

    /// Set the ledger retention, clamped to
    /// `MIN_EVENT_RETENTION_DAYS..=MAX_EVENT_RETENTION_DAYS`
    pub fn with_retention_days(mut self, days: i64) -> Self {
        if days < MIN_EVENT_RETENTION_DAYS {
            tracing::warn!(
                requested = days,
                minimum = MIN_EVENT_RETENTION_DAYS,
                "Webhook event retention below minimum, clamping"
            );
        } else if days > MAX_EVENT_RETENTION_DAYS {
            tracing::warn!(
                requested = days,
                maximum = MAX_EVENT_RETENTION_DAYS,
                "Webhook event retention above maximum, clamping"
            );
        }
        self.event_retention_days = days.clamp(MIN_EVENT_RETENTION_DAYS, MAX_EVENT_RETENTION_DAYS);
        self
    }

    pub fn event_retention(&self) -> time::Duration {
        time::Duration::days(self.event_retention_days)
    }
}

/// Read an env var, treating blank values as unset
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
