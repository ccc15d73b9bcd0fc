//! Outbound webhook delivery for Conveyor.
//!
//! Publishes application events to registered HTTP receivers:
//! - 📣 Fan-out of one event to every active subscription
//! - ✍️ HMAC-SHA256 request signing with a shared secret
//! - 🔁 Redelivery on a jittered backoff schedule through the job queue
//! - 🔌 One shared circuit breaker guarding all deliveries
//! - 🚫 Auto-disable of subscriptions that keep failing
//!
//! ## Signing
//!
//! ```
//! use conveyor_webhooks::WebhookSignature;
//!
//! let signer = WebhookSignature::new("my-secret");
//! let body = br#"{"eventType":"order.created"}"#;
//! let header = signer.sign(body);
//!
//! assert!(header.starts_with("sha256="));
//! assert!(signer.verify(body, &header));
//! ```
//!
//! ## Delivery
//!
//! ```no_run
//! use conveyor_queue::{JobQueue, QueueConfig};
//! use conveyor_resilience::BreakerRegistry;
//! use conveyor_webhooks::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WebhookError> {
//!     let queue = JobQueue::new(QueueConfig::default());
//!     let breakers = BreakerRegistry::default();
//!     let service = WebhookDeliveryService::new(
//!         queue,
//!         Arc::new(MemoryWebhookStore::new()),
//!         &breakers,
//!         Arc::new(HttpTransport::new()?),
//!         WebhookConfig::default(),
//!     );
//!
//!     service
//!         .subscribe("order.created", "https://example.com/hooks", "shared-secret")
//!         .await?;
//!     let deliveries = service
//!         .publish_event("order.created", serde_json::json!({"orderId": 42}))
//!         .await?;
//!     println!("queued {} deliveries", deliveries.len());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod model;
pub mod service;
pub mod signature;
pub mod store;
pub mod transport;

pub use backoff::BackoffSchedule;
pub use config::{WebhookConfig, WebhookConfigBuilder};
pub use error::{WebhookError, WebhookResult};
pub use model::{DeliveryStatus, EventEnvelope, WebhookDelivery, WebhookSubscription};
pub use service::{
    DELIVER_JOB_TYPE, DELIVERY_BREAKER, SUBSCRIPTION_DISABLED_EVENT, WebhookDeliveryService,
};
pub use signature::{SIGNATURE_SCHEME, WebhookSignature, headers};
pub use store::{MemoryWebhookStore, WebhookStore};
pub use transport::{HttpTransport, OutboundRequest, TransportResponse, WebhookTransport};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WebhookConfig;
    pub use crate::error::{WebhookError, WebhookResult};
    pub use crate::model::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
    pub use crate::service::WebhookDeliveryService;
    pub use crate::store::WebhookStore;
    pub use crate::transport::WebhookTransport;
}
