//! Status and telemetry publisher shared by the gateway and the relay.
//!
//! Two delivery tiers: status snapshots go out retained at QoS 1 so late
//! subscribers see the last-known state; log/metric/trade events are
//! best-effort QoS 0 and may be dropped.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::warn;

use crate::events::{LifecycleState, LogEvent, MetricEvent, StatusEvent, TradeEvent};
use crate::topics;

#[derive(Clone)]
pub struct StatusPublisher {
    client: AsyncClient,
    namespace: String,
}

impl StatusPublisher {
    pub fn new(client: AsyncClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Publish a retained status snapshot for a worker.
    pub async fn publish_status(&self, worker_id: &str, state: LifecycleState) {
        let event = StatusEvent::new(worker_id, state);
        self.publish(
            &topics::status(&self.namespace, worker_id),
            QoS::AtLeastOnce,
            true,
            &event,
        )
        .await;
    }

    /// Publish a retained error status with detail.
    pub async fn publish_error(&self, worker_id: &str, detail: &str) {
        let event = StatusEvent::with_error(worker_id, detail);
        self.publish(
            &topics::status(&self.namespace, worker_id),
            QoS::AtLeastOnce,
            true,
            &event,
        )
        .await;
    }

    /// Publish a best-effort log line on the per-level topic.
    pub async fn publish_log(&self, worker_id: &str, event: &LogEvent) {
        self.publish(
            &topics::logs(&self.namespace, worker_id, &event.level),
            QoS::AtMostOnce,
            false,
            event,
        )
        .await;
    }

    /// Publish a best-effort resource sample.
    pub async fn publish_metric(&self, worker_id: &str, event: &MetricEvent) {
        self.publish(
            &topics::metrics(&self.namespace, worker_id),
            QoS::AtMostOnce,
            false,
            event,
        )
        .await;
    }

    /// Publish a best-effort trade event.
    pub async fn publish_trade(&self, worker_id: &str, event: &TradeEvent) {
        self.publish(
            &topics::trades(&self.namespace, worker_id),
            QoS::AtMostOnce,
            false,
            event,
        )
        .await;
    }

    // Telemetry is diagnostic, so publish failures are logged and swallowed.
    async fn publish<T: Serialize>(&self, topic: &str, qos: QoS, retain: bool, payload: &T) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to serialize payload for {}: {}", topic, e);
                return;
            }
        };

        if let Err(e) = self.client.publish(topic, qos, retain, bytes).await {
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }
}
