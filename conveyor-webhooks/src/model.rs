//! Subscription, delivery and payload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Longest error message stored on a delivery.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1024;

/// A receiver registered for one event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,

    /// Event type this subscription receives (e.g. "order.created")
    pub event_type: String,

    /// Receiver URL
    pub target_url: String,

    /// Shared signing key
    pub secret: String,

    /// Inactive subscriptions get no new deliveries
    pub is_active: bool,

    /// Consecutive deliveries that failed terminally
    pub failure_count: u32,

    pub last_success_at: Option<DateTime<Utc>>,

    pub last_failure_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Create an active subscription.
    pub fn new(
        event_type: impl Into<String>,
        target_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            target_url: target_url.into(),
            secret: secret.into(),
            is_active: true,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: Utc::now(),
        }
    }

    /// Record a delivered event.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.last_success_at = Some(Utc::now());
    }

    /// Record a terminally failed delivery.
    ///
    /// Returns `true` when this failure reached `threshold` and switched the
    /// subscription off.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.failure_count += 1;
        self.last_failure_at = Some(Utc::now());

        if self.is_active && self.failure_count >= threshold {
            self.is_active = false;
            return true;
        }
        false
    }

    /// Switch the subscription back on with a clean failure count.
    pub fn reactivate(&mut self) {
        self.is_active = true;
        self.failure_count = 0;
    }
}

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first or next attempt
    Pending,
    /// Receiver accepted it
    Delivered,
    /// Gave up
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Check if the delivery is complete
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical body of a published event.
///
/// One envelope is built per publish, so every subscription receiving the
/// event sees the same idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: String,
}

impl EventEnvelope {
    /// Create an envelope with a fresh idempotency key.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    /// Payload to store on a delivery row.
    ///
    /// When the serialized envelope exceeds `max_bytes`, a projection with
    /// `truncated: true` and the first `preview_chars` characters is stored
    /// instead. The projection keeps the event type and idempotency key so
    /// redeliveries still carry the right headers.
    pub fn stored_payload(&self, max_bytes: usize, preview_chars: usize) -> serde_json::Result<Value> {
        let serialized = serde_json::to_string(self)?;
        if serialized.len() <= max_bytes {
            return serde_json::to_value(self);
        }

        let preview: String = serialized.chars().take(preview_chars).collect();
        Ok(json!({
            "truncated": true,
            "preview": preview,
            "eventType": self.event_type,
            "idempotencyKey": self.idempotency_key,
        }))
    }
}

/// One subscription's copy of a published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,

    /// Owning subscription
    pub subscription_id: Uuid,

    pub event_type: String,

    /// Stored body; possibly the truncated projection
    pub payload: Value,

    pub status: DeliveryStatus,

    /// Deliveries attempted so far
    pub attempt_count: u32,

    /// Last HTTP status received
    pub response_code: Option<u16>,

    /// Last failure reason
    pub error_message: Option<String>,

    /// When the next scheduled attempt runs
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// Create a pending delivery for a subscription.
    pub fn new(subscription: &WebhookSubscription, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            event_type: event_type.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            response_code: None,
            error_message: None,
            next_retry_at: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    /// Whether the stored payload is the truncated projection.
    pub fn is_truncated(&self) -> bool {
        self.payload
            .get("truncated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Idempotency key of the published event.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.payload.get("idempotencyKey").and_then(Value::as_str)
    }

    /// Mark as delivered.
    pub fn mark_delivered(&mut self, status_code: u16) {
        self.status = DeliveryStatus::Delivered;
        self.attempt_count += 1;
        self.response_code = Some(status_code);
        self.error_message = None;
        self.next_retry_at = None;
        self.delivered_at = Some(Utc::now());
    }

    /// Record a failed attempt, leaving the status to the caller.
    pub fn record_failed_attempt(&mut self, status_code: Option<u16>, error: &str) {
        self.attempt_count += 1;
        self.response_code = status_code;
        self.error_message = Some(truncate_message(error));
    }

    /// Mark as permanently failed.
    pub fn mark_failed(&mut self, error: &str) {
        self.status = DeliveryStatus::Failed;
        self.error_message = Some(truncate_message(error));
        self.next_retry_at = None;
    }
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = EventEnvelope::new("order.created", json!({"id": 1}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["eventType"], "order.created");
        assert_eq!(value["data"], json!({"id": 1}));
        assert!(value["timestamp"].is_string());
        assert_eq!(value["idempotencyKey"], envelope.idempotency_key.as_str());
    }

    #[test]
    fn test_small_payload_stored_whole() {
        let envelope = EventEnvelope::new("order.created", json!({"id": 1}));
        let stored = envelope.stored_payload(64 * 1024, 1024).unwrap();
        assert_eq!(stored, serde_json::to_value(&envelope).unwrap());
    }

    #[test]
    fn test_oversized_payload_truncated() {
        let envelope = EventEnvelope::new("bulk.export", json!({"blob": "x".repeat(500)}));
        let stored = envelope.stored_payload(100, 20).unwrap();

        assert_eq!(stored["truncated"], true);
        assert_eq!(stored["preview"].as_str().unwrap().chars().count(), 20);
        assert_eq!(stored["eventType"], "bulk.export");
        assert_eq!(stored["idempotencyKey"], envelope.idempotency_key.as_str());
    }

    #[test]
    fn test_subscription_failures_disable_at_threshold() {
        let mut subscription = WebhookSubscription::new("order.created", "http://x", "s");

        assert!(!subscription.record_failure(2));
        assert!(subscription.is_active);
        assert!(subscription.record_failure(2));
        assert!(!subscription.is_active);
        // Already disabled; no second transition.
        assert!(!subscription.record_failure(2));
        assert_eq!(subscription.failure_count, 3);

        subscription.reactivate();
        assert!(subscription.is_active);
        assert_eq!(subscription.failure_count, 0);
    }

    #[test]
    fn test_success_resets_failures() {
        let mut subscription = WebhookSubscription::new("order.created", "http://x", "s");
        subscription.record_failure(10);
        subscription.record_success();
        assert_eq!(subscription.failure_count, 0);
        assert!(subscription.last_success_at.is_some());
    }

    #[test]
    fn test_delivery_lifecycle() {
        let subscription = WebhookSubscription::new("order.created", "http://x", "s");
        let mut delivery = WebhookDelivery::new(&subscription, "order.created", json!({}));
        assert_eq!(delivery.status, DeliveryStatus::Pending);

        delivery.record_failed_attempt(Some(500), &"e".repeat(5000));
        assert_eq!(delivery.attempt_count, 1);
        assert_eq!(delivery.error_message.as_ref().unwrap().len(), MAX_ERROR_MESSAGE_CHARS);

        delivery.mark_delivered(200);
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert_eq!(delivery.attempt_count, 2);
        assert!(delivery.error_message.is_none());
        assert!(delivery.status.is_terminal());
    }
}
