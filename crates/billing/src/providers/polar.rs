//! Polar adapter (subscription-id based webhooks)
//!
//! Polar signs the raw body with HMAC-SHA256 (hex). The tenant is carried in
//! the subscription metadata set at checkout time.

use keel_shared::{BillingProvider, SubscriptionStatus};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::signature::verify_hex_hmac;
use super::{ProviderAdapter, ProviderEventData, WebhookEvent};
use crate::error::{BillingError, BillingResult};
use crate::models::{AnalyticsEvent, SubscriptionUpdate};

pub const SIGNATURE_HEADER: &str = "webhook-signature";

#[derive(Debug, Deserialize)]
struct PolarEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Subscription object carried by `subscription.*` events
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolarSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product: Option<PolarProduct>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(default)]
    pub cancel_at_period_end: Option<bool>,
    #[serde(default)]
    pub metadata: PolarMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolarProduct {
    #[serde(default)]
    pub name: Option<String>,
}

/// Metadata attached at checkout
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PolarMetadata {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub struct PolarAdapter {
    webhook_secret: Vec<u8>,
}

impl PolarAdapter {
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.as_bytes().to_vec(),
        }
    }

    fn subscription(event: &WebhookEvent) -> Option<&PolarSubscription> {
        match &event.data {
            ProviderEventData::Polar(sub) => sub.as_ref(),
            _ => None,
        }
    }
}

fn parse_uuid(field: &str, raw: Option<&str>) -> Option<Uuid> {
    let raw = raw?;
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(field = field, value = %raw, error = %e, "Ignoring malformed Polar metadata id");
            None
        }
    }
}

impl ProviderAdapter for PolarAdapter {
    fn provider(&self) -> BillingProvider {
        BillingProvider::Polar
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        verify_hex_hmac(&self.webhook_secret, payload, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> BillingResult<WebhookEvent> {
        let raw_payload: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(format!("not valid JSON: {}", e)))?;

        let envelope: PolarEnvelope = serde_json::from_value(raw_payload.clone())
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        let event_id = envelope
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| BillingError::WebhookPayloadInvalid("missing event id".to_string()))?;

        let subscription = if envelope.event_type.starts_with("subscription.") {
            let sub: PolarSubscription = serde_json::from_value(envelope.data).map_err(|e| {
                BillingError::WebhookPayloadInvalid(format!("invalid subscription object: {}", e))
            })?;
            Some(sub)
        } else {
            None
        };

        Ok(WebhookEvent {
            provider: BillingProvider::Polar,
            event_id,
            event_type: envelope.event_type,
            raw_payload,
            app_user_id: None,
            data: ProviderEventData::Polar(subscription),
        })
    }

    fn map_event_to_subscription_update(&self, event: &WebhookEvent) -> Option<SubscriptionUpdate> {
        let sub = Self::subscription(event)?;

        let vendor_status = match sub.status.parse::<SubscriptionStatus>() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    status = %sub.status,
                    error = %e,
                    "Unrecognized Polar subscription status"
                );
                return None;
            }
        };

        let (status, cancel_at_period_end) = match event.event_type.as_str() {
            "subscription.created"
            | "subscription.updated"
            | "subscription.active"
            | "subscription.uncanceled" => (vendor_status, sub.cancel_at_period_end),
            "subscription.canceled" => (vendor_status, Some(true)),
            "subscription.revoked" => (SubscriptionStatus::Canceled, Some(false)),
            _ => return None,
        };

        Some(SubscriptionUpdate {
            status,
            plan_id: sub.product_id.clone(),
            plan_name: sub.product.as_ref().and_then(|p| p.name.clone()),
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            cancel_at_period_end,
            provider_subscription_id: Some(sub.id.clone()),
            provider_customer_id: sub.customer_id.clone(),
            tenant_id: parse_uuid("tenant_id", sub.metadata.tenant_id.as_deref()),
            user_id: parse_uuid("user_id", sub.metadata.user_id.as_deref()),
        })
    }

    fn analytics_event(
        &self,
        event: &WebhookEvent,
        update: &SubscriptionUpdate,
    ) -> Option<AnalyticsEvent> {
        let name = match event.event_type.as_str() {
            "subscription.created" | "subscription.active" => "subscription_started",
            "subscription.canceled" | "subscription.revoked" => "subscription_canceled",
            _ => "subscription_updated",
        };

        Some(AnalyticsEvent {
            name: name.to_string(),
            user_id: update.user_id.map(|id| id.to_string()),
            properties: serde_json::json!({
                "provider": BillingProvider::Polar.as_str(),
                "event_type": event.event_type,
                "status": update.status.as_str(),
                "plan_id": update.plan_id,
                "cancel_at_period_end": update.cancel_at_period_end,
            }),
        })
    }
}
