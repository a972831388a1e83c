#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Keel Shared
//!
//! Types and database plumbing used by every Keel crate.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{BillingProvider, SubscriptionStatus, UnknownProvider, UnknownStatus};
