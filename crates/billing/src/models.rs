//! Persisted billing rows and the transient values passed between webhook stages

use keel_shared::{BillingProvider, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Placeholder plan stamped on rows created by purchase linking
pub const PENDING_PLAN_ID: &str = "pending";

/// A tenant's billing relationship (`subscriptions` table)
///
/// Each provider owns one pair of identifier columns. Webhook upserts keep
/// only the owning provider's pair populated.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub purchased_by_user_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub plan_id: String,
    pub plan_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    #[sqlx(try_from = "String")]
    pub provider: BillingProvider,
    pub polar_subscription_id: Option<String>,
    pub polar_customer_id: Option<String>,
    pub revenuecat_app_user_id: Option<String>,
    pub revenuecat_original_app_user_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// The (subscription, customer) identifier pair stored for `provider`
    pub fn provider_ids(&self, provider: BillingProvider) -> (Option<&str>, Option<&str>) {
        match provider {
            BillingProvider::Polar => (
                self.polar_subscription_id.as_deref(),
                self.polar_customer_id.as_deref(),
            ),
            BillingProvider::RevenueCat => (
                self.revenuecat_app_user_id.as_deref(),
                self.revenuecat_original_app_user_id.as_deref(),
            ),
        }
    }

    fn provider_ids_mut(
        &mut self,
        provider: BillingProvider,
    ) -> (&mut Option<String>, &mut Option<String>) {
        match provider {
            BillingProvider::Polar => (
                &mut self.polar_subscription_id,
                &mut self.polar_customer_id,
            ),
            BillingProvider::RevenueCat => (
                &mut self.revenuecat_app_user_id,
                &mut self.revenuecat_original_app_user_id,
            ),
        }
    }

    /// Build a new row from an update. Requires `tenant_id` and `plan_id`.
    pub fn from_update(
        provider: BillingProvider,
        update: &SubscriptionUpdate,
        now: OffsetDateTime,
    ) -> Option<Self> {
        let tenant_id = update.tenant_id?;
        let plan_id = update.plan_id.clone()?;

        let mut subscription = Self {
            id: Uuid::new_v4(),
            tenant_id,
            purchased_by_user_id: update.user_id,
            status: update.status,
            plan_id,
            plan_name: update.plan_name.clone(),
            current_period_start: update.current_period_start,
            current_period_end: update.current_period_end,
            cancel_at_period_end: update.cancel_at_period_end.unwrap_or(false),
            provider,
            polar_subscription_id: None,
            polar_customer_id: None,
            revenuecat_app_user_id: None,
            revenuecat_original_app_user_id: None,
            created_at: now,
            updated_at: now,
        };

        let (sub_id, customer_id) = subscription.provider_ids_mut(provider);
        *sub_id = update.provider_subscription_id.clone();
        *customer_id = update.provider_customer_id.clone();

        Some(subscription)
    }

    /// Partial update: fields absent from `update` keep their current value.
    /// `provider` and `updated_at` are always overwritten; the tenant never changes.
    pub fn apply_update(
        &mut self,
        provider: BillingProvider,
        update: &SubscriptionUpdate,
        now: OffsetDateTime,
    ) {
        self.status = update.status;

        if let Some(plan_id) = &update.plan_id {
            self.plan_id = plan_id.clone();
        }
        if let Some(plan_name) = &update.plan_name {
            self.plan_name = Some(plan_name.clone());
        }
        if let Some(start) = update.current_period_start {
            self.current_period_start = Some(start);
        }
        if let Some(end) = update.current_period_end {
            self.current_period_end = Some(end);
        }
        if let Some(cancel) = update.cancel_at_period_end {
            self.cancel_at_period_end = cancel;
        }
        if let Some(user_id) = update.user_id {
            self.purchased_by_user_id = Some(user_id);
        }

        if self.provider != provider {
            for other in BillingProvider::ALL.into_iter().filter(|p| *p != provider) {
                let (sub_id, customer_id) = self.provider_ids_mut(other);
                *sub_id = None;
                *customer_id = None;
            }
        }

        let (sub_id, customer_id) = self.provider_ids_mut(provider);
        if let Some(id) = &update.provider_subscription_id {
            *sub_id = Some(id.clone());
        }
        if let Some(id) = &update.provider_customer_id {
            *customer_id = Some(id.clone());
        }

        self.provider = provider;
        self.updated_at = now;
    }
}

/// Normalized subscription change produced by a provider adapter
///
/// `None` fields mean "leave unchanged". `tenant_id`/`user_id` may be filled
/// in by the orchestrator after tenant resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub status: SubscriptionStatus,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

impl SubscriptionUpdate {
    pub fn new(status: SubscriptionStatus) -> Self {
        Self {
            status,
            plan_id: None,
            plan_name: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: None,
            provider_subscription_id: None,
            provider_customer_id: None,
            tenant_id: None,
            user_id: None,
        }
    }
}

/// Idempotency ledger row (`subscription_events` table)
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEventRecord {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub provider: BillingProvider,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}

/// Ledger row about to be claimed
#[derive(Debug, Clone)]
pub struct NewSubscriptionEvent {
    pub provider: BillingProvider,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Why a webhook was acknowledged without mutating a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    IgnoredEventType,
    NoAppUserId,
    NotLinked,
}

/// Outcome of one webhook delivery; the HTTP body returned to the vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResult {
    pub const INVALID_SIGNATURE: &'static str = "Invalid signature";

    pub fn processed(subscription_id: Uuid) -> Self {
        Self {
            processed: true,
            subscription_id: Some(subscription_id),
            reason: None,
            error: None,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            processed: false,
            subscription_id: None,
            reason: Some(reason),
            error: None,
        }
    }

    pub fn invalid_signature() -> Self {
        Self {
            processed: false,
            subscription_id: None,
            reason: None,
            error: Some(Self::INVALID_SIGNATURE.to_string()),
        }
    }

    pub fn is_signature_failure(&self) -> bool {
        self.error.as_deref() == Some(Self::INVALID_SIGNATURE)
    }
}

/// Server-side analytics event derived from a webhook
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub name: String,
    /// Distinct id, when the adapter knows it; otherwise resolved from the subscription
    pub user_id: Option<String>,
    pub properties: serde_json::Value,
}
