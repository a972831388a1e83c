//! Server-side product analytics
//!
//! Analytics is a best-effort side effect: [`track_best_effort`] bounds the
//! call with a timeout and swallows every failure after logging it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::AnalyticsEvent;

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track_server_event(
        &self,
        event_name: &str,
        distinct_id: &str,
        properties: serde_json::Value,
    ) -> BillingResult<()>;
}

/// Used when no analytics key is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

#[async_trait]
impl AnalyticsSink for NoopAnalytics {
    async fn track_server_event(
        &self,
        event_name: &str,
        distinct_id: &str,
        _properties: serde_json::Value,
    ) -> BillingResult<()> {
        tracing::debug!(
            event = event_name,
            distinct_id = distinct_id,
            "Analytics disabled, event dropped"
        );
        Ok(())
    }
}

/// PostHog capture API client
#[derive(Clone)]
pub struct PostHogSink {
    client: reqwest::Client,
    api_key: String,
    capture_url: String,
}

impl PostHogSink {
    pub fn new(api_key: impl Into<String>, host: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            capture_url: format!("{}/capture/", host.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl AnalyticsSink for PostHogSink {
    async fn track_server_event(
        &self,
        event_name: &str,
        distinct_id: &str,
        properties: serde_json::Value,
    ) -> BillingResult<()> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| BillingError::Analytics(e.to_string()))?;

        let body = serde_json::json!({
            "api_key": self.api_key,
            "event": event_name,
            "distinct_id": distinct_id,
            "properties": properties,
            "timestamp": timestamp,
        });

        self.client
            .post(&self.capture_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Pick the sink for the current configuration
pub fn sink_from_config(config: &BillingConfig) -> Arc<dyn AnalyticsSink> {
    match &config.posthog_api_key {
        Some(key) => {
            tracing::info!(host = %config.posthog_host, "PostHog analytics enabled");
            Arc::new(PostHogSink::new(key.clone(), &config.posthog_host))
        }
        None => {
            tracing::warn!("Analytics not configured (missing POSTHOG_API_KEY)");
            Arc::new(NoopAnalytics)
        }
    }
}

/// Fire an analytics event without ever failing the caller
pub async fn track_best_effort(
    sink: &dyn AnalyticsSink,
    timeout: Duration,
    event: &AnalyticsEvent,
    distinct_id: &str,
) {
    let call = sink.track_server_event(&event.name, distinct_id, event.properties.clone());

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(())) => {
            tracing::debug!(event = %event.name, distinct_id = %distinct_id, "Analytics event sent");
        }
        Ok(Err(e)) => {
            tracing::warn!(event = %event.name, error = %e, "Failed to send analytics event");
        }
        Err(_) => {
            tracing::warn!(
                event = %event.name,
                timeout_ms = timeout.as_millis() as u64,
                "Analytics event timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> AnalyticsEvent {
        AnalyticsEvent {
            name: "subscription_started".into(),
            user_id: None,
            properties: serde_json::json!({"plan_id": "pro"}),
        }
    }

    #[tokio::test]
    async fn test_posthog_sink_posts_capture_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/capture/")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "api_key": "phc_test",
                "event": "subscription_started",
                "distinct_id": "user-1",
                "properties": {"plan_id": "pro"}
            })))
            .with_status(200)
            .with_body(r#"{"status":1}"#)
            .create_async()
            .await;

        let sink = PostHogSink::new("phc_test", &server.url());
        sink.track_server_event(
            "subscription_started",
            "user-1",
            serde_json::json!({"plan_id": "pro"}),
        )
        .await
        .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_posthog_sink_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/capture/")
            .with_status(503)
            .create_async()
            .await;

        let sink = PostHogSink::new("phc_test", &server.url());
        let result = sink
            .track_server_event("subscription_started", "user-1", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(BillingError::Analytics(_))));
    }

    struct SlowSink;

    #[async_trait]
    impl AnalyticsSink for SlowSink {
        async fn track_server_event(
            &self,
            _event_name: &str,
            _distinct_id: &str,
            _properties: serde_json::Value,
        ) -> BillingResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_best_effort_returns_on_timeout() {
        let started = std::time::Instant::now();
        track_best_effort(&SlowSink, Duration::from_millis(20), &sample_event(), "user-1").await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
