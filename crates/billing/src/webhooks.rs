//! Webhook orchestration
//!
//! One delivery runs: verify signature, parse, duplicate check, map, then a
//! single transaction that claims the ledger row and upserts the subscription.
//! Analytics fires after commit and never affects the result.

use std::sync::Arc;
use std::time::Duration;

use keel_shared::BillingProvider;
use time::OffsetDateTime;

use crate::analytics::{track_best_effort, AnalyticsSink};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    SkipReason, Subscription, SubscriptionEventRecord, SubscriptionUpdate, WebhookResult,
};
use crate::providers::{ProviderAdapter, ProviderRegistry, WebhookEvent};
use crate::store::BillingStore;
use crate::subscriptions::upsert_subscription;

/// Processes inbound subscription webhooks for every configured provider
#[derive(Clone)]
pub struct WebhookProcessor {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn BillingStore>,
    analytics: Arc<dyn AnalyticsSink>,
    analytics_timeout: Duration,
}

impl WebhookProcessor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn BillingStore>,
        analytics: Arc<dyn AnalyticsSink>,
        analytics_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            analytics,
            analytics_timeout,
        }
    }

    /// Header the HTTP layer should read the signature from
    pub fn signature_header(&self, provider_name: &str) -> BillingResult<&'static str> {
        Ok(self.registry.resolve(provider_name)?.signature_header())
    }

    /// Handle one webhook delivery
    ///
    /// Expected no-op outcomes (duplicate, ignored type, unlinked account) come
    /// back as `Ok` with `processed: false`. Parse failures, unknown providers
    /// and storage errors are `Err`; on storage errors nothing is committed, so
    /// a vendor retry reprocesses the event.
    pub async fn process_subscription_webhook(
        &self,
        provider_name: &str,
        raw_payload: &str,
        signature: &str,
    ) -> BillingResult<WebhookResult> {
        let adapter = self.registry.resolve(provider_name)?;
        let provider = adapter.provider();

        if !adapter.verify_webhook(raw_payload.as_bytes(), signature) {
            tracing::warn!(provider = %provider, "Webhook signature verification failed");
            return Ok(WebhookResult::invalid_signature());
        }

        let event = adapter.parse_webhook_event(raw_payload.as_bytes())?;

        tracing::info!(
            provider = %provider,
            event_id = %event.event_id,
            event_type = %event.event_type,
            "Processing subscription webhook"
        );

        if self.store.event_exists(provider, &event.event_id).await? {
            tracing::info!(event_id = %event.event_id, "Duplicate webhook event, skipping");
            return Ok(WebhookResult::skipped(SkipReason::Duplicate));
        }

        let Some(mut update) = adapter.map_event_to_subscription_update(&event) else {
            return self.record_skip(&event, SkipReason::IgnoredEventType).await;
        };

        // App-user based vendors can only update tenants that linked the purchase
        let app_user_id = match provider {
            BillingProvider::Polar => None,
            BillingProvider::RevenueCat => match event.app_user_id.as_deref() {
                Some(id) => Some(id),
                None => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        "RevenueCat event without app_user_id, not recorded"
                    );
                    return Ok(WebhookResult::skipped(SkipReason::NoAppUserId));
                }
            },
        };

        let mut tx = self.store.begin().await?;

        if !tx.claim_event(&event.ledger_entry()).await? {
            tracing::info!(event_id = %event.event_id, "Webhook event claimed concurrently, skipping");
            return Ok(WebhookResult::skipped(SkipReason::Duplicate));
        }

        if let Some(app_user_id) = app_user_id {
            match tx.find_by_provider_id(provider, app_user_id).await? {
                Some(linked) => {
                    update.tenant_id = Some(linked.tenant_id);
                    update.user_id = update.user_id.or(linked.purchased_by_user_id);
                }
                None => {
                    tx.commit().await?;
                    tracing::info!(
                        event_id = %event.event_id,
                        app_user_id = %app_user_id,
                        "RevenueCat app user not linked to a tenant"
                    );
                    return Ok(WebhookResult::skipped(SkipReason::NotLinked));
                }
            }
        }

        let subscription = upsert_subscription(tx.as_mut(), provider, &update).await?;
        tx.commit().await?;

        tracing::info!(
            provider = %provider,
            event_id = %event.event_id,
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            status = %subscription.status,
            "Subscription webhook processed"
        );

        self.fire_analytics(adapter, &event, &update, &subscription).await;

        Ok(WebhookResult::processed(subscription.id))
    }

    /// Record the event so redeliveries short-circuit, without touching subscriptions
    async fn record_skip(
        &self,
        event: &WebhookEvent,
        reason: SkipReason,
    ) -> BillingResult<WebhookResult> {
        let mut tx = self.store.begin().await?;
        if !tx.claim_event(&event.ledger_entry()).await? {
            return Ok(WebhookResult::skipped(SkipReason::Duplicate));
        }
        tx.commit().await?;

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            reason = ?reason,
            "Webhook event recorded without changes"
        );
        Ok(WebhookResult::skipped(reason))
    }

    async fn fire_analytics(
        &self,
        adapter: &dyn ProviderAdapter,
        event: &WebhookEvent,
        update: &SubscriptionUpdate,
        subscription: &Subscription,
    ) {
        let Some(analytics_event) = adapter.analytics_event(event, update) else {
            return;
        };

        let distinct_id = analytics_event
            .user_id
            .clone()
            .or_else(|| update.user_id.map(|id| id.to_string()))
            .or_else(|| subscription.purchased_by_user_id.map(|id| id.to_string()));

        match distinct_id {
            Some(distinct_id) => {
                track_best_effort(
                    self.analytics.as_ref(),
                    self.analytics_timeout,
                    &analytics_event,
                    &distinct_id,
                )
                .await;
            }
            None => {
                tracing::debug!(
                    event = %analytics_event.name,
                    subscription_id = %subscription.id,
                    "No user to attribute analytics event to, skipping"
                );
            }
        }
    }

    /// Ledger rows, newest first
    pub async fn list_events(
        &self,
        provider: Option<BillingProvider>,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<SubscriptionEventRecord>> {
        self.store
            .list_events(provider, limit.clamp(1, 500), offset.max(0))
            .await
    }

    /// Delete ledger rows older than `retention`
    pub async fn prune_ledger(&self, retention: time::Duration) -> BillingResult<u64> {
        let cutoff = OffsetDateTime::now_utc()
            .checked_sub(retention)
            .ok_or_else(|| {
                BillingError::Config(format!(
                    "Ledger retention of {} days is out of range",
                    retention.whole_days()
                ))
            })?;
        let deleted = self.store.prune_events_before(cutoff).await?;

        tracing::info!(
            deleted = deleted,
            retention_days = retention.whole_days(),
            "Pruned webhook event ledger"
        );
        Ok(deleted)
    }
}
