//! Application state

use std::sync::Arc;

use keel_billing::BillingService;
use sqlx::PgPool;

use crate::{activity::ActivityTracker, auth::JwtManager, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
    /// `None` disables activity tracking (tests, tools)
    pub activity: Option<ActivityTracker>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: BillingService) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        let activity = ActivityTracker::new(pool, config.activity_debounce);
        tracing::info!(
            debounce_secs = config.activity_debounce.as_secs(),
            "Activity tracking enabled"
        );

        Self {
            config,
            jwt_manager,
            billing: Arc::new(billing),
            activity: Some(activity),
        }
    }

    /// State without background side effects
    pub fn without_activity(config: Config, billing: BillingService) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config,
            jwt_manager,
            billing: Arc::new(billing),
            activity: None,
        }
    }
}
