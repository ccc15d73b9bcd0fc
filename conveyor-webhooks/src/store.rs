//! Persistence contract for subscriptions and deliveries, plus an in-memory
//! implementation.

use crate::model::{WebhookDelivery, WebhookSubscription};
use async_trait::async_trait;
use conveyor_queue::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Storage for subscriptions and deliveries.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Active subscriptions for an event type.
    async fn active_subscriptions(&self, event_type: &str) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError>;

    async fn create_subscription(&self, subscription: &WebhookSubscription) -> Result<(), StoreError>;

    async fn update_subscription(&self, subscription: &WebhookSubscription) -> Result<(), StoreError>;

    /// Clear the failure count and stamp `last_success_at` in one step.
    ///
    /// Never touches `is_active`. Returns `None` for an unknown subscription.
    async fn record_subscription_success(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError>;

    /// Count a terminal delivery failure in one step, switching the
    /// subscription off once `threshold` is reached.
    ///
    /// The flag is `true` only for the call that switched it off. Returns
    /// `None` for an unknown subscription.
    async fn record_subscription_failure(
        &self,
        id: Uuid,
        threshold: u32,
    ) -> Result<Option<(WebhookSubscription, bool)>, StoreError>;

    /// Switch a subscription back on with a clean failure count.
    async fn reactivate_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError>;

    async fn create_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, StoreError>;

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;
}

/// In-memory store. Can be told to fail every call.
#[derive(Debug, Default)]
pub struct MemoryWebhookStore {
    subscriptions: RwLock<HashMap<Uuid, WebhookSubscription>>,
    deliveries: RwLock<HashMap<Uuid, WebhookDelivery>>,
    failing: AtomicBool,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of one subscription.
    pub fn subscription(&self, id: Uuid) -> Option<WebhookSubscription> {
        self.subscriptions.read().get(&id).cloned()
    }

    /// Snapshot of one delivery.
    pub fn delivery(&self, id: Uuid) -> Option<WebhookDelivery> {
        self.deliveries.read().get(&id).cloned()
    }

    /// All deliveries, oldest first.
    pub fn deliveries(&self) -> Vec<WebhookDelivery> {
        let mut deliveries: Vec<WebhookDelivery> = self.deliveries.read().values().cloned().collect();
        deliveries.sort_by_key(|d| (d.created_at, d.id));
        deliveries
    }

    /// Deliveries belonging to one subscription, oldest first.
    pub fn deliveries_for(&self, subscription_id: Uuid) -> Vec<WebhookDelivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.subscription_id == subscription_id)
            .collect()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn active_subscriptions(&self, event_type: &str) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.check()?;
        let mut subscriptions: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.is_active && s.event_type == event_type)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| (s.created_at, s.id));
        Ok(subscriptions)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError> {
        self.check()?;
        Ok(self.subscription(id))
    }

    async fn create_subscription(&self, subscription: &WebhookSubscription) -> Result<(), StoreError> {
        self.check()?;
        self.subscriptions
            .write()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &WebhookSubscription) -> Result<(), StoreError> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write();
        let slot = subscriptions
            .get_mut(&subscription.id)
            .ok_or_else(|| StoreError::NotFound(subscription.id.to_string()))?;
        *slot = subscription.clone();
        Ok(())
    }

    async fn record_subscription_success(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write();
        Ok(subscriptions.get_mut(&id).map(|subscription| {
            subscription.record_success();
            subscription.clone()
        }))
    }

    async fn record_subscription_failure(
        &self,
        id: Uuid,
        threshold: u32,
    ) -> Result<Option<(WebhookSubscription, bool)>, StoreError> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write();
        Ok(subscriptions.get_mut(&id).map(|subscription| {
            let disabled = subscription.record_failure(threshold);
            (subscription.clone(), disabled)
        }))
    }

    async fn reactivate_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError> {
        self.check()?;
        let mut subscriptions = self.subscriptions.write();
        Ok(subscriptions.get_mut(&id).map(|subscription| {
            subscription.reactivate();
            subscription.clone()
        }))
    }

    async fn create_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.check()?;
        self.deliveries.write().insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, StoreError> {
        self.check()?;
        Ok(self.delivery(id))
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.check()?;
        let mut deliveries = self.deliveries.write();
        let slot = deliveries
            .get_mut(&delivery.id)
            .ok_or_else(|| StoreError::NotFound(delivery.id.to_string()))?;
        *slot = delivery.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_active_subscriptions_filtered() {
        let store = MemoryWebhookStore::new();
        let active = WebhookSubscription::new("order.created", "http://a", "s");
        let mut inactive = WebhookSubscription::new("order.created", "http://b", "s");
        inactive.is_active = false;
        let other = WebhookSubscription::new("order.paid", "http://c", "s");

        for subscription in [&active, &inactive, &other] {
            store.create_subscription(subscription).await.unwrap();
        }

        let found = store.active_subscriptions("order.created").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, active.id);
    }

    #[tokio::test]
    async fn test_update_unknown_rows() {
        let store = MemoryWebhookStore::new();
        let subscription = WebhookSubscription::new("e", "http://a", "s");
        let delivery = WebhookDelivery::new(&subscription, "e", json!({}));

        assert!(matches!(
            store.update_subscription(&subscription).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_delivery(&delivery).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_round_trip() {
        let store = MemoryWebhookStore::new();
        let subscription = WebhookSubscription::new("e", "http://a", "s");
        let mut delivery = WebhookDelivery::new(&subscription, "e", json!({"a": 1}));
        store.create_delivery(&delivery).await.unwrap();

        delivery.mark_delivered(204);
        store.update_delivery(&delivery).await.unwrap();

        let loaded = store.get_delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(loaded, delivery);
        assert_eq!(store.deliveries_for(subscription.id).len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_accounting_in_place() {
        let store = MemoryWebhookStore::new();
        let subscription = WebhookSubscription::new("e", "http://a", "s");
        store.create_subscription(&subscription).await.unwrap();

        let (after_first, disabled) = store
            .record_subscription_failure(subscription.id, 2)
            .await
            .unwrap()
            .unwrap();
        assert!(!disabled);
        assert_eq!(after_first.failure_count, 1);

        let (after_second, disabled) = store
            .record_subscription_failure(subscription.id, 2)
            .await
            .unwrap()
            .unwrap();
        assert!(disabled);
        assert!(!after_second.is_active);

        // A success resets the count but leaves the subscription off.
        let after_success = store
            .record_subscription_success(subscription.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_success.failure_count, 0);
        assert!(!after_success.is_active);
        assert!(after_success.last_success_at.is_some());

        let reactivated = store
            .reactivate_subscription(subscription.id)
            .await
            .unwrap()
            .unwrap();
        assert!(reactivated.is_active);

        assert!(store
            .record_subscription_success(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryWebhookStore::new();
        store.set_failing(true);
        assert!(store.active_subscriptions("e").await.is_err());
        assert!(store.get_delivery(Uuid::new_v4()).await.is_err());
    }
}
