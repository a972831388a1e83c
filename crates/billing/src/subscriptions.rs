//! Subscription resolution, upsert and purchase linking

use std::sync::Arc;

use keel_shared::{BillingProvider, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Subscription, SubscriptionUpdate, PENDING_PLAN_ID};
use crate::store::{BillingStore, BillingTransaction};

/// Resolve the row an update applies to and write it
///
/// Resolution order:
/// 1. the provider's subscription identifier column
/// 2. the tenant (a tenant switching vendors reuses its row)
///
/// With no match a new row is inserted, which needs `tenant_id` and `plan_id`.
pub async fn upsert_subscription(
    tx: &mut dyn BillingTransaction,
    provider: BillingProvider,
    update: &SubscriptionUpdate,
) -> BillingResult<Subscription> {
    let now = OffsetDateTime::now_utc();

    let mut existing = match update.provider_subscription_id.as_deref() {
        Some(id) => tx.find_by_provider_id(provider, id).await?,
        None => None,
    };
    if existing.is_none() {
        if let Some(tenant_id) = update.tenant_id {
            existing = tx.find_by_tenant(tenant_id).await?;
        }
    }

    if let Some(mut subscription) = existing {
        if let Some(tenant_id) = update.tenant_id {
            if tenant_id != subscription.tenant_id {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    row_tenant_id = %subscription.tenant_id,
                    event_tenant_id = %tenant_id,
                    provider = %provider,
                    "Webhook tenant differs from the subscription matched by provider id; keeping row tenant"
                );
            }
        }

        let previous_provider = subscription.provider;
        subscription.apply_update(provider, update, now);
        let saved = tx.update_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %saved.id,
            tenant_id = %saved.tenant_id,
            provider = %provider,
            previous_provider = %previous_provider,
            status = %saved.status,
            "Subscription updated"
        );
        return Ok(saved);
    }

    let subscription = Subscription::from_update(provider, update, now)
        .ok_or(BillingError::MissingRequiredFields)?;

    match tx.insert_subscription(&subscription).await? {
        Some(saved) => {
            tracing::info!(
                subscription_id = %saved.id,
                tenant_id = %saved.tenant_id,
                provider = %provider,
                status = %saved.status,
                plan_id = %saved.plan_id,
                "Subscription created"
            );
            Ok(saved)
        }
        None => {
            // Lost the insert race to another delivery for the same tenant
            let mut current = tx
                .find_by_tenant(subscription.tenant_id)
                .await?
                .ok_or_else(|| {
                    BillingError::Conflict(format!(
                        "subscription for tenant {} changed concurrently",
                        subscription.tenant_id
                    ))
                })?;
            tracing::info!(
                subscription_id = %current.id,
                tenant_id = %current.tenant_id,
                "Tenant row created concurrently, applying update instead"
            );
            current.apply_update(provider, update, now);
            tx.update_subscription(&current).await
        }
    }
}

/// Tenant-facing subscription operations
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn get_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Option<Subscription>> {
        self.store.find_subscription_by_tenant(tenant_id).await
    }

    /// Associate a RevenueCat app user with a tenant after an in-app purchase
    ///
    /// Stamps the app user id onto the tenant's row, or creates a `pending`
    /// placeholder the next RevenueCat webhook fills in. Repeating the call
    /// with the same arguments is a no-op.
    pub async fn link_revenuecat_purchase(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        app_user_id: &str,
    ) -> BillingResult<Subscription> {
        let app_user_id = app_user_id.trim();
        if app_user_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "appUserId must not be empty".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let now = OffsetDateTime::now_utc();

        if let Some(linked) = tx
            .find_by_provider_id(BillingProvider::RevenueCat, app_user_id)
            .await?
        {
            if linked.tenant_id != tenant_id {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    linked_tenant_id = %linked.tenant_id,
                    "RevenueCat app user already linked to another tenant"
                );
                return Err(BillingError::Conflict(
                    "appUserId is linked to a different tenant".to_string(),
                ));
            }
            tx.commit().await?;
            return Ok(linked);
        }

        let saved = match tx.find_by_tenant(tenant_id).await? {
            Some(mut subscription) => {
                subscription.revenuecat_app_user_id = Some(app_user_id.to_string());
                if subscription.purchased_by_user_id.is_none() {
                    subscription.purchased_by_user_id = Some(user_id);
                }
                subscription.updated_at = now;
                tx.update_subscription(&subscription)
                    .await
                    .map_err(linked_concurrently)?
            }
            None => {
                let placeholder = Subscription {
                    id: Uuid::new_v4(),
                    tenant_id,
                    purchased_by_user_id: Some(user_id),
                    status: SubscriptionStatus::Incomplete,
                    plan_id: PENDING_PLAN_ID.to_string(),
                    plan_name: None,
                    current_period_start: None,
                    current_period_end: None,
                    cancel_at_period_end: false,
                    provider: BillingProvider::RevenueCat,
                    polar_subscription_id: None,
                    polar_customer_id: None,
                    revenuecat_app_user_id: Some(app_user_id.to_string()),
                    revenuecat_original_app_user_id: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_subscription(&placeholder)
                    .await
                    .map_err(linked_concurrently)?
                    .ok_or_else(|| {
                        BillingError::Conflict(format!(
                            "subscription for tenant {} created concurrently",
                            tenant_id
                        ))
                    })?
            }
        };

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            subscription_id = %saved.id,
            "RevenueCat purchase linked"
        );

        Ok(saved)
    }
}

/// Another tenant linked the same app user between our lookup and write
fn linked_concurrently(err: BillingError) -> BillingError {
    match err {
        BillingError::UniqueViolation(constraint) => {
            tracing::warn!(
                constraint = %constraint,
                "RevenueCat app user linked concurrently by another tenant"
            );
            BillingError::Conflict("appUserId is linked to a different tenant".to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSubscriptionEvent, SubscriptionEventRecord};
    use crate::store::MemoryBillingStore;
    use async_trait::async_trait;

    /// Transaction whose writes lose to a writer that committed after our lookups
    struct RacingTransaction {
        winner: Subscription,
        hidden_tenant_reads: usize,
        tenant_reads: usize,
        unique_violation: bool,
    }

    #[async_trait]
    impl BillingTransaction for RacingTransaction {
        async fn claim_event(&mut self, _event: &NewSubscriptionEvent) -> BillingResult<bool> {
            Ok(true)
        }

        async fn find_by_provider_id(
            &mut self,
            _provider: BillingProvider,
            _provider_subscription_id: &str,
        ) -> BillingResult<Option<Subscription>> {
            Ok(None)
        }

        async fn find_by_tenant(
            &mut self,
            _tenant_id: Uuid,
        ) -> BillingResult<Option<Subscription>> {
            self.tenant_reads += 1;
            if self.tenant_reads > self.hidden_tenant_reads {
                Ok(Some(self.winner.clone()))
            } else {
                Ok(None)
            }
        }

        async fn insert_subscription(
            &mut self,
            _subscription: &Subscription,
        ) -> BillingResult<Option<Subscription>> {
            if self.unique_violation {
                return Err(BillingError::UniqueViolation(
                    "subscriptions_revenuecat_app_user_id_key".to_string(),
                ));
            }
            Ok(None)
        }

        async fn update_subscription(
            &mut self,
            subscription: &Subscription,
        ) -> BillingResult<Subscription> {
            if self.unique_violation {
                return Err(BillingError::UniqueViolation(
                    "subscriptions_revenuecat_app_user_id_key".to_string(),
                ));
            }
            Ok(subscription.clone())
        }

        async fn commit(self: Box<Self>) -> BillingResult<()> {
            Ok(())
        }
    }

    struct RacingStore {
        winner: Subscription,
        hidden_tenant_reads: usize,
    }

    #[async_trait]
    impl BillingStore for RacingStore {
        async fn event_exists(
            &self,
            _provider: BillingProvider,
            _event_id: &str,
        ) -> BillingResult<bool> {
            Ok(false)
        }

        async fn begin(&self) -> BillingResult<Box<dyn BillingTransaction>> {
            Ok(Box::new(RacingTransaction {
                winner: self.winner.clone(),
                hidden_tenant_reads: self.hidden_tenant_reads,
                tenant_reads: 0,
                unique_violation: true,
            }))
        }

        async fn find_subscription_by_tenant(
            &self,
            _tenant_id: Uuid,
        ) -> BillingResult<Option<Subscription>> {
            Ok(None)
        }

        async fn list_events(
            &self,
            _provider: Option<BillingProvider>,
            _limit: i64,
            _offset: i64,
        ) -> BillingResult<Vec<SubscriptionEventRecord>> {
            Ok(Vec::new())
        }

        async fn prune_events_before(&self, _cutoff: OffsetDateTime) -> BillingResult<u64> {
            Ok(0)
        }
    }

    fn polar_row(tenant_id: Uuid) -> Subscription {
        let mut update = SubscriptionUpdate::new(SubscriptionStatus::Active);
        update.tenant_id = Some(tenant_id);
        update.plan_id = Some("starter".into());
        update.plan_name = Some("Starter".into());
        update.provider_subscription_id = Some("sub_first".into());
        Subscription::from_update(BillingProvider::Polar, &update, OffsetDateTime::now_utc())
            .unwrap()
    }

    fn service() -> (SubscriptionService, MemoryBillingStore) {
        let store = MemoryBillingStore::new();
        (SubscriptionService::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_link_creates_pending_placeholder() {
        let (service, store) = service();
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let sub = service
            .link_revenuecat_purchase(tenant_id, user_id, " app_user_1 ")
            .await
            .unwrap();

        assert_eq!(sub.plan_id, PENDING_PLAN_ID);
        assert_eq!(sub.status, SubscriptionStatus::Incomplete);
        assert_eq!(sub.provider, BillingProvider::RevenueCat);
        assert_eq!(sub.revenuecat_app_user_id.as_deref(), Some("app_user_1"));
        assert_eq!(sub.purchased_by_user_id, Some(user_id));
        assert_eq!(store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let (service, store) = service();
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let first = service
            .link_revenuecat_purchase(tenant_id, user_id, "app_user_1")
            .await
            .unwrap();
        let second = service
            .link_revenuecat_purchase(tenant_id, user_id, "app_user_1")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_link_stamps_existing_tenant_row() {
        let (service, store) = service();
        let tenant_id = Uuid::new_v4();
        let mut update = SubscriptionUpdate::new(SubscriptionStatus::Active);
        update.tenant_id = Some(tenant_id);
        update.plan_id = Some("pro".into());
        update.provider_subscription_id = Some("sub_abc".into());
        let existing =
            Subscription::from_update(BillingProvider::Polar, &update, OffsetDateTime::now_utc())
                .unwrap();
        store.insert_raw(existing.clone()).await;

        let linked = service
            .link_revenuecat_purchase(tenant_id, Uuid::new_v4(), "app_user_1")
            .await
            .unwrap();

        assert_eq!(linked.id, existing.id);
        assert_eq!(linked.plan_id, "pro");
        assert_eq!(linked.provider, BillingProvider::Polar);
        assert_eq!(linked.revenuecat_app_user_id.as_deref(), Some("app_user_1"));
    }

    #[tokio::test]
    async fn test_link_rejects_foreign_or_blank_app_user() {
        let (service, _store) = service();
        service
            .link_revenuecat_purchase(Uuid::new_v4(), Uuid::new_v4(), "app_user_1")
            .await
            .unwrap();

        let err = service
            .link_revenuecat_purchase(Uuid::new_v4(), Uuid::new_v4(), "app_user_1")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));

        let err = service
            .link_revenuecat_purchase(Uuid::new_v4(), Uuid::new_v4(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_upsert_without_required_fields_fails() {
        let store = MemoryBillingStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut update = SubscriptionUpdate::new(SubscriptionStatus::Active);
        update.tenant_id = Some(Uuid::new_v4());

        let err = upsert_subscription(tx.as_mut(), BillingProvider::Polar, &update)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::MissingRequiredFields));
    }

    #[tokio::test]
    async fn test_upsert_falls_back_to_update_when_tenant_insert_loses_race() {
        let tenant_id = Uuid::new_v4();
        let winner = polar_row(tenant_id);
        let mut tx = RacingTransaction {
            winner: winner.clone(),
            hidden_tenant_reads: 1,
            tenant_reads: 0,
            unique_violation: false,
        };

        let mut update = SubscriptionUpdate::new(SubscriptionStatus::PastDue);
        update.tenant_id = Some(tenant_id);
        update.plan_id = Some("pro".into());
        update.provider_subscription_id = Some("sub_second".into());

        let saved = upsert_subscription(&mut tx, BillingProvider::Polar, &update)
            .await
            .unwrap();

        assert_eq!(tx.tenant_reads, 2);
        assert_eq!(saved.id, winner.id);
        assert_eq!(saved.tenant_id, tenant_id);
        assert_eq!(saved.status, SubscriptionStatus::PastDue);
        assert_eq!(saved.plan_id, "pro");
        assert_eq!(saved.polar_subscription_id.as_deref(), Some("sub_second"));
        // Absent fields keep the committed row's values
        assert_eq!(saved.plan_name.as_deref(), Some("Starter"));
        assert_eq!(saved.created_at, winner.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_link_of_same_app_user_is_a_conflict() {
        let tenant_id = Uuid::new_v4();

        // Placeholder insert trips the app user index
        let service = SubscriptionService::new(Arc::new(RacingStore {
            winner: polar_row(tenant_id),
            hidden_tenant_reads: usize::MAX,
        }));
        let err = service
            .link_revenuecat_purchase(tenant_id, Uuid::new_v4(), "app_user_1")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));

        // Stamping the tenant's existing row trips it too
        let service = SubscriptionService::new(Arc::new(RacingStore {
            winner: polar_row(tenant_id),
            hidden_tenant_reads: 0,
        }));
        let err = service
            .link_revenuecat_purchase(tenant_id, Uuid::new_v4(), "app_user_1")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
    }
}
