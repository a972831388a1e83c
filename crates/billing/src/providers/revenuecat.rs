//! RevenueCat adapter (app-user-id based webhooks)
//!
//! RevenueCat authenticates webhooks with a static Authorization header.
//! Events identify the purchaser by `app_user_id`; the tenant is only known
//! once the mobile client has linked that id (see
//! [`SubscriptionService::link_revenuecat_purchase`](crate::SubscriptionService::link_revenuecat_purchase)).

use keel_shared::{BillingProvider, SubscriptionStatus};
use serde::Deserialize;
use time::OffsetDateTime;

use super::signature::constant_time_eq;
use super::{ProviderAdapter, ProviderEventData, WebhookEvent};
use crate::error::{BillingError, BillingResult};
use crate::models::{AnalyticsEvent, SubscriptionUpdate};

pub const SIGNATURE_HEADER: &str = "authorization";

#[derive(Debug, Deserialize)]
struct RevenueCatEnvelope {
    event: RevenueCatEvent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RevenueCatEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub app_user_id: Option<String>,
    #[serde(default)]
    pub original_app_user_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub purchased_at_ms: Option<i64>,
    #[serde(default)]
    pub expiration_at_ms: Option<i64>,
    #[serde(default)]
    pub period_type: Option<String>,
}

pub struct RevenueCatAdapter {
    expected_auth: Vec<u8>,
}

fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
}

fn from_millis(ms: Option<i64>) -> Option<OffsetDateTime> {
    let ms = ms?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

impl RevenueCatAdapter {
    pub fn new(webhook_auth: &str) -> Self {
        Self {
            expected_auth: strip_bearer(webhook_auth).as_bytes().to_vec(),
        }
    }

    fn rc_event(event: &WebhookEvent) -> Option<&RevenueCatEvent> {
        match &event.data {
            ProviderEventData::RevenueCat(rc) => Some(rc),
            _ => None,
        }
    }
}

impl ProviderAdapter for RevenueCatAdapter {
    fn provider(&self) -> BillingProvider {
        BillingProvider::RevenueCat
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_webhook(&self, _payload: &[u8], signature: &str) -> bool {
        let provided = strip_bearer(signature);
        if provided.is_empty() {
            return false;
        }
        constant_time_eq(provided.as_bytes(), &self.expected_auth)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> BillingResult<WebhookEvent> {
        let raw_payload: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(format!("not valid JSON: {}", e)))?;

        let envelope: RevenueCatEnvelope = serde_json::from_value(raw_payload.clone())
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;
        let rc = envelope.event;

        let event_id = rc
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| BillingError::WebhookPayloadInvalid("missing event id".to_string()))?;

        let app_user_id = rc.app_user_id.clone().filter(|id| !id.trim().is_empty());

        Ok(WebhookEvent {
            provider: BillingProvider::RevenueCat,
            event_id,
            event_type: rc.event_type.clone(),
            raw_payload,
            app_user_id,
            data: ProviderEventData::RevenueCat(rc),
        })
    }

    fn map_event_to_subscription_update(&self, event: &WebhookEvent) -> Option<SubscriptionUpdate> {
        let rc = Self::rc_event(event)?;

        let trial = rc.period_type.as_deref() == Some("TRIAL");
        let (status, cancel_at_period_end) = match rc.event_type.as_str() {
            "INITIAL_PURCHASE" | "RENEWAL" | "UNCANCELLATION" | "PRODUCT_CHANGE" => {
                let status = if trial {
                    SubscriptionStatus::Trialing
                } else {
                    SubscriptionStatus::Active
                };
                (status, Some(false))
            }
            "CANCELLATION" => (SubscriptionStatus::Active, Some(true)),
            "BILLING_ISSUE" => (SubscriptionStatus::PastDue, None),
            "EXPIRATION" => (SubscriptionStatus::Expired, Some(false)),
            // TEST, TRANSFER, SUBSCRIBER_ALIAS, NON_RENEWING_PURCHASE, ...
            _ => return None,
        };

        Some(SubscriptionUpdate {
            status,
            plan_id: rc.product_id.clone(),
            plan_name: None,
            current_period_start: from_millis(rc.purchased_at_ms),
            current_period_end: from_millis(rc.expiration_at_ms),
            cancel_at_period_end,
            provider_subscription_id: event.app_user_id.clone(),
            provider_customer_id: rc.original_app_user_id.clone(),
            tenant_id: None,
            user_id: None,
        })
    }

    fn analytics_event(
        &self,
        event: &WebhookEvent,
        update: &SubscriptionUpdate,
    ) -> Option<AnalyticsEvent> {
        let name = match event.event_type.as_str() {
            "INITIAL_PURCHASE" => "subscription_started",
            "RENEWAL" => "subscription_renewed",
            "CANCELLATION" => "subscription_canceled",
            "EXPIRATION" => "subscription_expired",
            "BILLING_ISSUE" => "subscription_billing_issue",
            _ => "subscription_updated",
        };

        Some(AnalyticsEvent {
            name: name.to_string(),
            user_id: None,
            properties: serde_json::json!({
                "provider": BillingProvider::RevenueCat.as_str(),
                "event_type": event.event_type,
                "status": update.status.as_str(),
                "plan_id": update.plan_id,
            }),
        })
    }
}
