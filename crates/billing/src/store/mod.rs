//! Persistence for subscriptions and the webhook idempotency ledger
//!
//! A webhook runs as one unit of work ([`BillingTransaction`]): the ledger
//! claim, the resolver lookups and the subscription write commit together or
//! not at all. Dropping a transaction without `commit` rolls it back.

mod memory;
mod postgres;

use async_trait::async_trait;
use keel_shared::BillingProvider;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{NewSubscriptionEvent, Subscription, SubscriptionEventRecord};

pub use memory::MemoryBillingStore;
pub use postgres::PgBillingStore;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Whether `(provider, event_id)` is already in the ledger
    async fn event_exists(&self, provider: BillingProvider, event_id: &str) -> BillingResult<bool>;

    async fn begin(&self) -> BillingResult<Box<dyn BillingTransaction>>;

    async fn find_subscription_by_tenant(&self, tenant_id: Uuid)
        -> BillingResult<Option<Subscription>>;

    /// Newest ledger rows first
    async fn list_events(
        &self,
        provider: Option<BillingProvider>,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<SubscriptionEventRecord>>;

    /// Delete ledger rows processed before `cutoff`; returns the number removed
    async fn prune_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;
}

#[async_trait]
pub trait BillingTransaction: Send {
    /// Insert the ledger row. `false` when it already exists (duplicate delivery).
    async fn claim_event(&mut self, event: &NewSubscriptionEvent) -> BillingResult<bool>;

    /// Look up by the provider's subscription identifier column, locking the row
    async fn find_by_provider_id(
        &mut self,
        provider: BillingProvider,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    async fn find_by_tenant(&mut self, tenant_id: Uuid) -> BillingResult<Option<Subscription>>;

    /// Insert a new row. `None` if the tenant already has one.
    async fn insert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> BillingResult<Option<Subscription>>;

    /// Write every column of an existing row
    async fn update_subscription(&mut self, subscription: &Subscription)
        -> BillingResult<Subscription>;

    async fn commit(self: Box<Self>) -> BillingResult<()>;
}
