//! Keel Background Worker
//!
//! Handles scheduled jobs:
//! - Webhook event ledger pruning (daily at 03:30 UTC)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use keel_billing::BillingService;
use keel_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

const LEDGER_PRUNE_SCHEDULE: &str = "0 30 3 * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Keel Worker v{}", env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let billing = Arc::new(BillingService::from_env(pool)?);
    info!(
        retention_days = billing.config.event_retention_days,
        "Billing service initialized"
    );

    let scheduler = JobScheduler::new().await?;

    // Job 1: Prune the webhook idempotency ledger
    let prune_billing = billing.clone();
    scheduler
        .add(Job::new_async(LEDGER_PRUNE_SCHEDULE, move |_uuid, _l| {
            let billing = prune_billing.clone();
            Box::pin(async move {
                info!("Running webhook event ledger prune");
                match billing.prune_ledger().await {
                    Ok(deleted) => info!(deleted = deleted, "Ledger prune complete"),
                    Err(e) => error!(error = %e, "Ledger prune failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Webhook ledger prune (03:30 UTC)");

    // Job 2: Heartbeat
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
