//! Queue-driven webhook delivery

use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};
use crate::model::{DeliveryStatus, EventEnvelope, WebhookDelivery, WebhookSubscription};
use crate::signature::{WebhookSignature, headers};
use crate::store::WebhookStore;
use crate::transport::{OutboundRequest, WebhookTransport};
use chrono::{DateTime, Utc};
use conveyor_queue::{Job, JobQueue, QueueError};
use conveyor_resilience::{BreakerRegistry, CircuitBreaker, CircuitBreakerError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Job type of delivery jobs.
pub const DELIVER_JOB_TYPE: &str = "webhook.deliver";

/// Name of the breaker shared by every delivery.
pub const DELIVERY_BREAKER: &str = "webhook_delivery";

/// Event published when a subscription is switched off after repeated failures.
pub const SUBSCRIPTION_DISABLED_EVENT: &str = "webhook.subscription.disabled";

/// Payload of a delivery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliverJob {
    delivery_id: Uuid,
}

/// Fans published events out to subscriptions and delivers them through the
/// job queue.
///
/// Every delivery goes through one shared `webhook_delivery` circuit breaker,
/// so a receiver that keeps failing can throttle delivery to all receivers.
/// Redelivery pacing comes from the [`BackoffSchedule`](crate::BackoffSchedule)
/// and the attempt count on the delivery row, not from the queue's own attempt
/// budget, which only covers store failures.
#[derive(Clone)]
pub struct WebhookDeliveryService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    queue: JobQueue,
    store: Arc<dyn WebhookStore>,
    transport: Arc<dyn WebhookTransport>,
    breaker: Arc<CircuitBreaker>,
    config: WebhookConfig,
}

impl WebhookDeliveryService {
    /// Create the service and register the `webhook.deliver` handler on `queue`.
    pub fn new(
        queue: JobQueue,
        store: Arc<dyn WebhookStore>,
        breakers: &BreakerRegistry,
        transport: Arc<dyn WebhookTransport>,
        config: WebhookConfig,
    ) -> Self {
        let inner = Arc::new(ServiceInner {
            queue: queue.clone(),
            store,
            transport,
            breaker: breakers.get_or_create(DELIVERY_BREAKER),
            config,
        });

        // The queue owns the handler; a weak reference avoids a cycle back to
        // the queue through the service.
        let weak = Arc::downgrade(&inner);
        queue.register(DELIVER_JOB_TYPE, move |job: Job| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Err(QueueError::Other(
                        "webhook delivery service was dropped".to_string(),
                    ));
                };
                let request: DeliverJob = serde_json::from_value(job.payload)?;
                inner
                    .deliver(request.delivery_id)
                    .await
                    .map_err(QueueError::execution)
            }
        });

        info!(
            timeout = ?inner.config.delivery_timeout,
            auto_disable_threshold = inner.config.auto_disable_threshold,
            stages = inner.config.backoff.len(),
            "Webhook delivery service initialized"
        );

        Self { inner }
    }

    /// Publish an event to every active subscription for `event_type`.
    ///
    /// Returns the deliveries created, one per subscription; empty when
    /// nothing subscribes to the event.
    pub async fn publish_event(
        &self,
        event_type: &str,
        data: Value,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        self.inner.publish_event(event_type, data).await
    }

    /// Re-enqueue a delivery immediately, bypassing the backoff schedule.
    ///
    /// Returns `false` without doing anything when the delivery is unknown or
    /// already delivered, or its subscription is missing or inactive.
    pub async fn retry_delivery(&self, delivery_id: Uuid) -> WebhookResult<bool> {
        let inner = &self.inner;
        let Some(mut delivery) = inner.store.get_delivery(delivery_id).await? else {
            debug!(delivery_id = %delivery_id, "Manual retry of unknown delivery");
            return Ok(false);
        };

        if delivery.status == DeliveryStatus::Delivered {
            return Ok(false);
        }

        let active = inner
            .store
            .get_subscription(delivery.subscription_id)
            .await?
            .is_some_and(|subscription| subscription.is_active);
        if !active {
            return Ok(false);
        }

        delivery.status = DeliveryStatus::Pending;
        delivery.next_retry_at = None;
        inner.store.update_delivery(&delivery).await?;
        inner.enqueue_delivery(delivery.id, Duration::ZERO).await;

        info!(delivery_id = %delivery.id, "Manual webhook redelivery queued");
        Ok(true)
    }

    /// Register a new subscription.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        target_url: &str,
        secret: impl Into<String>,
    ) -> WebhookResult<WebhookSubscription> {
        Url::parse(target_url)?;
        let subscription = WebhookSubscription::new(event_type, target_url, secret);
        self.inner.store.create_subscription(&subscription).await?;

        info!(
            subscription_id = %subscription.id,
            event_type = %subscription.event_type,
            "Webhook subscription created"
        );
        Ok(subscription)
    }

    /// Switch a disabled subscription back on and clear its failure count.
    pub async fn reactivate_subscription(&self, id: Uuid) -> WebhookResult<WebhookSubscription> {
        let subscription = self
            .inner
            .store
            .reactivate_subscription(id)
            .await?
            .ok_or_else(|| WebhookError::SubscriptionNotFound(id.to_string()))?;

        info!(subscription_id = %id, "Webhook subscription reactivated");
        Ok(subscription)
    }

    /// Load a delivery.
    pub async fn delivery(&self, id: Uuid) -> WebhookResult<WebhookDelivery> {
        self.inner
            .store
            .get_delivery(id)
            .await?
            .ok_or_else(|| WebhookError::DeliveryNotFound(id.to_string()))
    }

    /// The shared delivery breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for WebhookDeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDeliveryService")
            .field("config", &self.inner.config)
            .field("breaker", &self.inner.breaker.name())
            .finish()
    }
}

impl ServiceInner {
    async fn publish_event(
        &self,
        event_type: &str,
        data: Value,
    ) -> WebhookResult<Vec<WebhookDelivery>> {
        let subscriptions = self.store.active_subscriptions(event_type).await?;
        if subscriptions.is_empty() {
            debug!(event_type, "No active subscriptions for event");
            return Ok(Vec::new());
        }

        let envelope = EventEnvelope::new(event_type, data);
        let payload =
            envelope.stored_payload(self.config.max_payload_bytes, self.config.preview_chars)?;

        let mut deliveries = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let delivery = WebhookDelivery::new(subscription, event_type, payload.clone());
            self.store.create_delivery(&delivery).await?;
            self.enqueue_delivery(delivery.id, Duration::ZERO).await;
            deliveries.push(delivery);
        }

        info!(
            event_type,
            deliveries = deliveries.len(),
            idempotency_key = %envelope.idempotency_key,
            truncated = deliveries.first().is_some_and(WebhookDelivery::is_truncated),
            "Published webhook event"
        );
        Ok(deliveries)
    }

    async fn enqueue_delivery(&self, delivery_id: Uuid, delay: Duration) -> Job {
        self.queue
            .enqueue(
                DELIVER_JOB_TYPE,
                json!({ "deliveryId": delivery_id }),
                self.config.job_max_attempts,
                delay,
            )
            .await
    }

    /// Run one delivery attempt.
    ///
    /// Transport failures feed the backoff policy and return `Ok`. Only store
    /// failures come back as errors, so the queue retries the job.
    async fn deliver(&self, delivery_id: Uuid) -> WebhookResult<()> {
        let Some(mut delivery) = self.store.get_delivery(delivery_id).await? else {
            warn!(delivery_id = %delivery_id, "Delivery not found, dropping job");
            return Ok(());
        };

        if delivery.status == DeliveryStatus::Delivered {
            debug!(delivery_id = %delivery.id, "Delivery already delivered");
            return Ok(());
        }

        let subscription = match self.store.get_subscription(delivery.subscription_id).await? {
            Some(subscription) if subscription.is_active => subscription,
            _ => {
                warn!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    "Subscription inactive, abandoning delivery"
                );
                delivery.mark_failed("subscription inactive");
                self.store.update_delivery(&delivery).await?;
                return Ok(());
            }
        };

        let request = self.build_request(&delivery, &subscription)?;
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.delivery_timeout;

        let outcome = self
            .breaker
            .exec(|| send_once(transport, request, timeout))
            .await;

        match outcome {
            Ok(status) => {
                delivery.mark_delivered(status);
                self.store.update_delivery(&delivery).await?;
                self.store.record_subscription_success(subscription.id).await?;

                debug!(
                    delivery_id = %delivery.id,
                    status,
                    attempts = delivery.attempt_count,
                    "Webhook delivered"
                );
                Ok(())
            }
            Err(CircuitBreakerError::Open { name }) => {
                self.handle_failure(delivery, subscription, WebhookError::CircuitOpen(name))
                    .await
            }
            Err(CircuitBreakerError::Execution(err)) => {
                self.handle_failure(delivery, subscription, err).await
            }
        }
    }

    async fn handle_failure(
        &self,
        mut delivery: WebhookDelivery,
        subscription: WebhookSubscription,
        err: WebhookError,
    ) -> WebhookResult<()> {
        let message = err.to_string();
        delivery.record_failed_attempt(err.status(), &message);

        if let Some(delay) = self.config.backoff.delay_for(delivery.attempt_count) {
            delivery.status = DeliveryStatus::Pending;
            delivery.next_retry_at = Some(after(delay));
            self.store.update_delivery(&delivery).await?;
            self.enqueue_delivery(delivery.id, delay).await;

            warn!(
                delivery_id = %delivery.id,
                attempts = delivery.attempt_count,
                retry_in = ?delay,
                error = %message,
                "Webhook delivery failed, retry scheduled"
            );
            return Ok(());
        }

        delivery.mark_failed(&message);
        self.store.update_delivery(&delivery).await?;
        error!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            attempts = delivery.attempt_count,
            error = %message,
            "Webhook delivery failed permanently"
        );

        let Some((subscription, disabled)) = self
            .store
            .record_subscription_failure(subscription.id, self.config.auto_disable_threshold)
            .await?
        else {
            warn!(subscription_id = %subscription.id, "Subscription vanished before failure was recorded");
            return Ok(());
        };

        if disabled {
            warn!(
                subscription_id = %subscription.id,
                failure_count = subscription.failure_count,
                "Webhook subscription disabled after repeated failures"
            );

            let notice = json!({
                "subscriptionId": subscription.id,
                "eventType": subscription.event_type,
                "targetUrl": subscription.target_url,
                "failureCount": subscription.failure_count,
            });
            if let Err(e) = self.publish_event(SUBSCRIPTION_DISABLED_EVENT, notice).await {
                warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to publish subscription disabled event"
                );
            }
        }

        Ok(())
    }

    fn build_request(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
    ) -> WebhookResult<OutboundRequest> {
        let body = serde_json::to_vec(&delivery.payload)?;
        let signature = WebhookSignature::new(subscription.secret.as_str()).sign(&body);

        let mut request_headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
            (headers::SIGNATURE.to_string(), signature),
            (headers::EVENT_TYPE.to_string(), delivery.event_type.clone()),
            (headers::DELIVERY_ID.to_string(), delivery.id.to_string()),
        ];
        if let Some(key) = delivery.idempotency_key() {
            request_headers.push((headers::IDEMPOTENCY_KEY.to_string(), key.to_string()));
        }

        Ok(OutboundRequest {
            url: subscription.target_url.clone(),
            headers: request_headers,
            body,
        })
    }
}

/// One bounded attempt; non-2xx answers are failures.
async fn send_once(
    transport: Arc<dyn WebhookTransport>,
    request: OutboundRequest,
    timeout: Duration,
) -> WebhookResult<u16> {
    let response = tokio::time::timeout(timeout, transport.send(request))
        .await
        .map_err(|_| WebhookError::Timeout(timeout))??;

    if response.is_success() {
        Ok(response.status)
    } else {
        Err(WebhookError::UnexpectedStatus(response.status))
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
