//! API routes

pub mod billing;
pub mod health;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::activity::track_activity;
use crate::auth::require_auth;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Layers run bottom-up: auth first, then activity sees the AuthUser
    let authenticated = Router::new()
        .route(
            "/billing/revenuecat/link",
            post(billing::link_revenuecat_purchase),
        )
        .route("/billing/subscription", get(billing::get_subscription))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_activity))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .merge(authenticated)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use keel_billing::{BillingConfig, BillingService, MemoryBillingStore, NoopAnalytics};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;

    const RC_AUTH: &str = "rc_route_secret";

    fn test_state() -> AppState {
        let config = Config {
            database_url: "postgres://localhost/keel_test".into(),
            bind_address: "127.0.0.1:0".into(),
            jwt_secret: "test-jwt-secret".into(),
            jwt_expiry_hours: 1,
            run_migrations: false,
            activity_debounce: Duration::from_secs(300),
            allowed_origins: vec![],
        };
        let billing_config = BillingConfig {
            polar_webhook_secret: Some("polar_route_secret".into()),
            revenuecat_webhook_auth: Some(RC_AUTH.into()),
            ..Default::default()
        };
        let billing = BillingService::with_store(
            billing_config,
            Arc::new(MemoryBillingStore::new()),
            Arc::new(NoopAnalytics),
        );
        AppState::without_activity(config, billing)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<Value>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).ok();
        (status, body)
    }

    fn rc_webhook(auth: &str, body: String) -> Request<Body> {
        Request::post("/webhooks/revenuecat")
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn rc_event(event_id: &str, app_user_id: &str) -> String {
        json!({
            "api_version": "1.0",
            "event": {
                "id": event_id,
                "type": "INITIAL_PURCHASE",
                "app_user_id": app_user_id,
                "product_id": "pro_monthly",
                "period_type": "NORMAL"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Some(json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn test_webhook_status_mapping() {
        let app = create_router(test_state());

        let (status, body) = send(&app, rc_webhook("Bearer wrong", rc_event("rc_1", "u1"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, Some(json!({"processed": false, "error": "Invalid signature"})));

        // Missing signature header is an empty signature
        let request = Request::post("/webhooks/polar")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, rc_webhook(RC_AUTH, "not json".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::post("/webhooks/paddle")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, rc_webhook(RC_AUTH, rc_event("rc_2", "u1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Some(json!({"processed": false, "reason": "not_linked"})));
    }

    #[tokio::test]
    async fn test_link_requires_auth() {
        let app = create_router(test_state());
        let request = Request::post("/billing/revenuecat/link")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"appUserId": "u1"}).to_string()))
            .unwrap();

        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_link_then_webhook_fills_subscription() {
        let state = test_state();
        let tenant_id = Uuid::new_v4();
        let token = state
            .jwt_manager
            .generate_access_token(Uuid::new_v4(), tenant_id)
            .unwrap();
        let bearer = format!("Bearer {}", token);
        let app = create_router(state);

        let link = |app_user_id: &str| {
            Request::post("/billing/revenuecat/link")
                .header(header::AUTHORIZATION, &bearer)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"appUserId": app_user_id}).to_string()))
                .unwrap()
        };

        let (status, _) = send(&app, link("  ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, link("app_user_1")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, rc_webhook(RC_AUTH, rc_event("rc_3", "app_user_1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref().and_then(|b| b["processed"].as_bool()), Some(true));

        let request = Request::get("/billing/subscription")
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["tenantId"], json!(tenant_id.to_string()));
        assert_eq!(body["planId"], json!("pro_monthly"));
        assert_eq!(body["status"], json!("active"));
        assert_eq!(body["provider"], json!("revenuecat"));
    }
}
