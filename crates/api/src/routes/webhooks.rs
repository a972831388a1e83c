//! Inbound billing webhooks

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /webhooks/{provider}
///
/// The body is taken as raw text so signatures are checked over the exact bytes sent.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    let webhooks = &state.billing.webhooks;

    let header_name = webhooks.signature_header(&provider)?;
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let result = webhooks
        .process_subscription_webhook(&provider, &body, signature)
        .await?;

    let status = if result.is_signature_failure() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(result)).into_response())
}
