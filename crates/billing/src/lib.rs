// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Keel Billing Module
//!
//! Processes subscription webhooks from billing vendors and keeps one
//! subscription row per tenant in sync.
//!
//! ## Features
//!
//! - **Provider adapters**: Polar (subscription-id based) and RevenueCat (app-user-id based)
//! - **Idempotency ledger**: every handled event is recorded once per `(provider, event_id)`
//! - **Resolver/upsert**: partial updates, vendor switches reuse the tenant's row
//! - **Purchase linking**: mobile clients associate a RevenueCat app user with a tenant
//! - **Analytics**: best-effort server events, never fatal to a webhook

pub mod analytics;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod store;
pub mod subscriptions;
pub mod webhooks;


use std::sync::Arc;

use sqlx::PgPool;

pub use analytics::{
    sink_from_config, track_best_effort, AnalyticsSink, NoopAnalytics, PostHogSink,
};
pub use config::BillingConfig;
pub use error::{BillingError, BillingResult};
pub use models::{
    AnalyticsEvent, SkipReason, Subscription, SubscriptionEventRecord, SubscriptionUpdate,
    WebhookResult, PENDING_PLAN_ID,
};
pub use providers::{ProviderAdapter, ProviderRegistry, WebhookEvent};
pub use store::{BillingStore, BillingTransaction, MemoryBillingStore, PgBillingStore};
pub use subscriptions::{upsert_subscription, SubscriptionService};
pub use webhooks::WebhookProcessor;

/// Main billing service combining webhook processing and subscription operations
#[derive(Clone)]
pub struct BillingService {
    pub webhooks: WebhookProcessor,
    pub subscriptions: SubscriptionService,
    pub registry: Arc<ProviderRegistry>,
    pub config: BillingConfig,
}

impl BillingService {
    /// Create from environment variables, backed by Postgres
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let analytics = sink_from_config(&config);
        Ok(Self::with_store(config, Arc::new(PgBillingStore::new(pool)), analytics))
    }

    pub fn with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let webhooks = WebhookProcessor::new(
            registry.clone(),
            store.clone(),
            analytics,
            config.analytics_timeout,
        );

        Self {
            webhooks,
            subscriptions: SubscriptionService::new(store),
            registry,
            config,
        }
    }

    /// Prune the idempotency ledger using the configured retention
    pub async fn prune_ledger(&self) -> BillingResult<u64> {
        self.webhooks.prune_ledger(self.config.event_retention()).await
    }
}
