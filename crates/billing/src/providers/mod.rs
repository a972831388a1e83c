//! Billing provider adapters
//!
//! Each vendor implements [`ProviderAdapter`]: verify the webhook signature,
//! parse the vendor payload into a [`WebhookEvent`], map it to a
//! [`SubscriptionUpdate`], and optionally describe an analytics event.
//!
//! [`ProviderRegistry::adapter`] matches exhaustively on [`BillingProvider`],
//! so a new vendor variant does not compile until it has an adapter.

pub mod polar;
pub mod revenuecat;
pub(crate) mod signature;

use keel_shared::BillingProvider;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::{AnalyticsEvent, NewSubscriptionEvent, SubscriptionUpdate};

pub use polar::{PolarAdapter, PolarSubscription};
pub use revenuecat::{RevenueCatAdapter, RevenueCatEvent};

/// Vendor-agnostic view of one inbound webhook
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub provider: BillingProvider,
    pub event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    /// Purchaser id for app-user based vendors
    pub app_user_id: Option<String>,
    pub data: ProviderEventData,
}

/// Vendor-specific fields kept for mapping
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEventData {
    /// `None` for non-subscription Polar events (checkouts, orders, ...)
    Polar(Option<PolarSubscription>),
    RevenueCat(RevenueCatEvent),
}

impl WebhookEvent {
    pub fn ledger_entry(&self) -> NewSubscriptionEvent {
        NewSubscriptionEvent {
            provider: self.provider,
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            payload: self.raw_payload.clone(),
        }
    }
}

/// Capabilities every billing vendor must provide
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> BillingProvider;

    /// HTTP header carrying the signature for this vendor
    fn signature_header(&self) -> &'static str;

    /// Check the signature over the raw payload. Never errors; malformed input is `false`.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool;

    /// Deserialize the vendor JSON. Invalid JSON or a missing event id is
    /// [`BillingError::WebhookPayloadInvalid`].
    fn parse_webhook_event(&self, payload: &[u8]) -> BillingResult<WebhookEvent>;

    /// `None` when the event does not affect subscription state
    fn map_event_to_subscription_update(&self, event: &WebhookEvent) -> Option<SubscriptionUpdate>;

    fn analytics_event(
        &self,
        _event: &WebhookEvent,
        _update: &SubscriptionUpdate,
    ) -> Option<AnalyticsEvent> {
        None
    }
}

/// Name -> adapter lookup, populated from configured secrets
pub struct ProviderRegistry {
    polar: Option<PolarAdapter>,
    revenuecat: Option<RevenueCatAdapter>,
}

impl ProviderRegistry {
    pub fn from_config(config: &BillingConfig) -> Self {
        let polar = config
            .polar_webhook_secret
            .as_deref()
            .map(PolarAdapter::new);
        let revenuecat = config
            .revenuecat_webhook_auth
            .as_deref()
            .map(RevenueCatAdapter::new);

        for provider in BillingProvider::ALL {
            let configured = match provider {
                BillingProvider::Polar => polar.is_some(),
                BillingProvider::RevenueCat => revenuecat.is_some(),
            };
            if configured {
                tracing::info!(provider = %provider, "Billing provider webhooks enabled");
            } else {
                tracing::warn!(provider = %provider, "Billing provider not configured (missing webhook secret)");
            }
        }

        Self { polar, revenuecat }
    }

    pub fn adapter(&self, provider: BillingProvider) -> Option<&dyn ProviderAdapter> {
        match provider {
            BillingProvider::Polar => self.polar.as_ref().map(|a| a as &dyn ProviderAdapter),
            BillingProvider::RevenueCat => {
                self.revenuecat.as_ref().map(|a| a as &dyn ProviderAdapter)
            }
        }
    }

    pub fn is_configured(&self, provider: BillingProvider) -> bool {
        self.adapter(provider).is_some()
    }

    /// Resolve a provider by wire name
    pub fn resolve(&self, name: &str) -> BillingResult<&dyn ProviderAdapter> {
        let provider: BillingProvider = name.parse()?;
        self.adapter(provider)
            .ok_or(BillingError::ProviderNotConfigured(provider))
    }
}
