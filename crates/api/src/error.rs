//! API error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keel_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookPayloadInvalid(_) | BillingError::InvalidInput(_) => {
                ApiError::BadRequest(err.to_string())
            }
            BillingError::UnknownProvider(_)
            | BillingError::ProviderNotConfigured(_)
            | BillingError::NotFound(_) => ApiError::NotFound(err.to_string()),
            BillingError::Conflict(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server faults are logged in full but not echoed to the caller
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_shared::BillingProvider;

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (
                BillingError::WebhookPayloadInvalid("missing event id".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::UnknownProvider("paddle".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                BillingError::ProviderNotConfigured(BillingProvider::Polar),
                StatusCode::NOT_FOUND,
            ),
            (BillingError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                BillingError::UniqueViolation("subscriptions_tenant_id_key".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::MissingRequiredFields,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::Database("connection reset".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
