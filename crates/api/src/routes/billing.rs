//! Tenant billing routes

use axum::{extract::State, http::StatusCode, Extension, Json};
use keel_billing::Subscription;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPurchaseRequest {
    pub app_user_id: String,
}

/// POST /billing/revenuecat/link
pub async fn link_revenuecat_purchase(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<LinkPurchaseRequest>,
) -> ApiResult<StatusCode> {
    state
        .billing
        .subscriptions
        .link_revenuecat_purchase(auth_user.tenant_id, auth_user.user_id, &req.app_user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /billing/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .get_for_tenant(auth_user.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("subscription".to_string()))?;

    Ok(Json(subscription))
}
