//! Per-user daily activity tracking
//!
//! Authenticated requests bump a `user_activity` row for the current UTC day.
//! Writes are debounced per user in memory and run in a detached task, so a
//! slow or failing database never delays the request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::state::AppState;

/// Bound on the debounce map; expired entries are evicted past this size
const MAX_TRACKED_USERS: usize = 10_000;

#[derive(Clone)]
pub struct ActivityTracker {
    pool: PgPool,
    debounce: Duration,
    last_write: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl ActivityTracker {
    pub fn new(pool: PgPool, debounce: Duration) -> Self {
        Self {
            pool,
            debounce,
            last_write: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a write is due for `user_id`; marks it written when it is
    fn should_record(&self, user_id: Uuid, now: Instant) -> bool {
        let mut last_write = match self.last_write.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(previous) = last_write.get(&user_id) {
            if now.duration_since(*previous) < self.debounce {
                return false;
            }
        }

        if last_write.len() >= MAX_TRACKED_USERS {
            let debounce = self.debounce;
            last_write.retain(|_, seen| now.duration_since(*seen) < debounce);
        }
        last_write.insert(user_id, now);
        true
    }

    /// Record activity without waiting on the database
    pub fn record(&self, user_id: Uuid) {
        if !self.should_record(user_id, Instant::now()) {
            return;
        }

        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = upsert_activity(&pool, user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to record user activity");
            }
        });
    }
}

async fn upsert_activity(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    let now = OffsetDateTime::now_utc();

    sqlx::query(
        r#"
        INSERT INTO user_activity (user_id, activity_date, request_count, last_seen_at)
        VALUES ($1, $2, 1, $3)
        ON CONFLICT (user_id, activity_date) DO UPDATE SET
            request_count = user_activity.request_count + 1,
            last_seen_at = EXCLUDED.last_seen_at
        "#,
    )
    .bind(user_id)
    .bind(now.date())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Middleware recording activity for the authenticated user, if any
pub async fn track_activity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let (Some(tracker), Some(user)) = (
        state.activity.as_ref(),
        request.extensions().get::<AuthUser>(),
    ) {
        tracker.record(user.user_id);
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(debounce: Duration) -> ActivityTracker {
        let pool = PgPool::connect_lazy("postgres://localhost/keel_test").unwrap();
        ActivityTracker::new(pool, debounce)
    }

    #[tokio::test]
    async fn test_debounce_window() {
        let tracker = tracker(Duration::from_secs(300));
        let user = Uuid::new_v4();
        let start = Instant::now();

        assert!(tracker.should_record(user, start));
        assert!(!tracker.should_record(user, start + Duration::from_secs(10)));
        assert!(tracker.should_record(user, start + Duration::from_secs(301)));

        // Other users are debounced independently
        assert!(tracker.should_record(Uuid::new_v4(), start + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_map_stays_bounded() {
        let tracker = tracker(Duration::from_millis(1));
        let start = Instant::now();
        for _ in 0..MAX_TRACKED_USERS {
            tracker.should_record(Uuid::new_v4(), start);
        }

        assert!(tracker.should_record(Uuid::new_v4(), start + Duration::from_secs(1)));
        assert_eq!(tracker.last_write.lock().unwrap().len(), 1);
    }
}
