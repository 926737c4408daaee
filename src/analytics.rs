use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// One product-analytics event. Delivery is fire-and-forget: a failed
/// delivery is logged and counted, never surfaced to the request path.
#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsEvent {
    pub name: &'static str,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Returns whether the event was delivered.
    async fn publish(&self, event: AnalyticsEvent) -> bool;
}

/// Posts events as JSON to a collector endpoint.
#[derive(Clone, Debug)]
pub struct HttpAnalyticsSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalyticsSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn publish(&self, event: AnalyticsEvent) -> bool {
        let name = event.name;
        match self.client.post(&self.endpoint).json(&event).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(event = name, status = %response.status(), "analytics endpoint rejected event");
                false
            }
            Err(err) => {
                warn!(event = name, error = %err, "analytics delivery failed");
                false
            }
        }
    }
}

/// Sink for deployments without a collector; accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAnalyticsSink;

#[async_trait]
impl AnalyticsSink for NoopAnalyticsSink {
    async fn publish(&self, _event: AnalyticsEvent) -> bool {
        true
    }
}
