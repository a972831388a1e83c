//! In-memory billing store for tests and local development
//!
//! Transactions hold the store lock for their whole lifetime and work on a
//! copy of the state, which is written back only on commit.

use std::sync::Arc;

use async_trait::async_trait;
use keel_shared::BillingProvider;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{BillingStore, BillingTransaction};
use crate::error::{BillingError, BillingResult};
use crate::models::{NewSubscriptionEvent, Subscription, SubscriptionEventRecord};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    subscriptions: Vec<Subscription>,
    events: Vec<SubscriptionEventRecord>,
}

impl MemoryState {
    fn by_provider_id(&self, provider: BillingProvider, id: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.provider_ids(provider).0 == Some(id))
    }

    fn by_tenant(&self, tenant_id: Uuid) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.tenant_id == tenant_id)
    }

    /// Mirrors the partial unique indexes on provider subscription ids
    fn check_unique_provider_ids(&self, candidate: &Subscription) -> BillingResult<()> {
        for provider in BillingProvider::ALL {
            if let (Some(id), _) = candidate.provider_ids(provider) {
                let taken = self
                    .subscriptions
                    .iter()
                    .any(|s| s.id != candidate.id && s.provider_ids(provider).0 == Some(id));
                if taken {
                    return Err(BillingError::UniqueViolation(format!(
                        "subscriptions_{}_subscription_id_key",
                        provider
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.subscriptions.clone()
    }

    pub async fn events(&self) -> Vec<SubscriptionEventRecord> {
        self.state.lock().await.events.clone()
    }

    /// Seed a row directly, bypassing the webhook flow
    pub async fn insert_raw(&self, subscription: Subscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    /// Seed a ledger row with an explicit processing time
    pub async fn insert_event_raw(&self, record: SubscriptionEventRecord) {
        self.state.lock().await.events.push(record);
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn event_exists(&self, provider: BillingProvider, event_id: &str) -> BillingResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .any(|e| e.provider == provider && e.event_id == event_id))
    }

    async fn begin(&self) -> BillingResult<Box<dyn BillingTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn find_subscription_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self.state.lock().await.by_tenant(tenant_id).cloned())
    }

    async fn list_events(
        &self,
        provider: Option<BillingProvider>,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<SubscriptionEventRecord>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| provider.map_or(true, |p| e.provider == p))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));

        Ok(events
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn prune_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|e| e.processed_at >= cutoff);
        Ok((before - state.events.len()) as u64)
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl BillingTransaction for MemoryTransaction {
    async fn claim_event(&mut self, event: &NewSubscriptionEvent) -> BillingResult<bool> {
        let exists = self
            .working
            .events
            .iter()
            .any(|e| e.provider == event.provider && e.event_id == event.event_id);
        if exists {
            return Ok(false);
        }

        self.working.events.push(SubscriptionEventRecord {
            id: Uuid::new_v4(),
            provider: event.provider,
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            processed_at: OffsetDateTime::now_utc(),
        });
        Ok(true)
    }

    async fn find_by_provider_id(
        &mut self,
        provider: BillingProvider,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .working
            .by_provider_id(provider, provider_subscription_id)
            .cloned())
    }

    async fn find_by_tenant(&mut self, tenant_id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.working.by_tenant(tenant_id).cloned())
    }

    async fn insert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> BillingResult<Option<Subscription>> {
        if self.working.by_tenant(subscription.tenant_id).is_some() {
            return Ok(None);
        }
        self.working.check_unique_provider_ids(subscription)?;
        self.working.subscriptions.push(subscription.clone());
        Ok(Some(subscription.clone()))
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> BillingResult<Subscription> {
        self.working.check_unique_provider_ids(subscription)?;
        let row = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription.id)))?;
        *row = subscription.clone();
        Ok(subscription.clone())
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_shared::SubscriptionStatus;

    fn ledger_entry(event_id: &str) -> NewSubscriptionEvent {
        NewSubscriptionEvent {
            provider: BillingProvider::Polar,
            event_id: event_id.to_string(),
            event_type: "subscription.updated".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let store = MemoryBillingStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.claim_event(&ledger_entry("evt_1")).await.unwrap());
        }
        assert!(!store
            .event_exists(BillingProvider::Polar, "evt_1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_claim_is_unique_per_provider() {
        let store = MemoryBillingStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.claim_event(&ledger_entry("evt_1")).await.unwrap());
        assert!(!tx.claim_event(&ledger_entry("evt_1")).await.unwrap());

        let mut other = ledger_entry("evt_1");
        other.provider = BillingProvider::RevenueCat;
        assert!(tx.claim_event(&other).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_second_row_for_tenant() {
        let store = MemoryBillingStore::new();
        let tenant_id = Uuid::new_v4();
        let mut update = crate::models::SubscriptionUpdate::new(SubscriptionStatus::Active);
        update.tenant_id = Some(tenant_id);
        update.plan_id = Some("pro".into());
        let now = OffsetDateTime::now_utc();

        let first = Subscription::from_update(BillingProvider::Polar, &update, now).unwrap();
        let second = Subscription::from_update(BillingProvider::Polar, &update, now).unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_subscription(&first).await.unwrap().is_some());
        assert!(tx.insert_subscription(&second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_prune_events() {
        let store = MemoryBillingStore::new();
        let now = OffsetDateTime::now_utc();
        for (i, age_days) in [1_i64, 10, 100].iter().enumerate() {
            store
                .insert_event_raw(SubscriptionEventRecord {
                    id: Uuid::new_v4(),
                    provider: BillingProvider::Polar,
                    event_id: format!("evt_{}", i),
                    event_type: "subscription.updated".into(),
                    payload: serde_json::json!({}),
                    processed_at: now - time::Duration::days(*age_days),
                })
                .await;
        }

        let listed = store.list_events(None, 10, 0).await.unwrap();
        assert_eq!(listed[0].event_id, "evt_0");

        let pruned = store
            .prune_events_before(now - time::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(store
            .list_events(Some(BillingProvider::RevenueCat), 10, 0)
            .await
            .unwrap()
            .is_empty());
    }
}
