//! Subscription lookup consumed by the dispatcher.
//!
//! The registry belongs to the surrounding data layer. The dispatcher only
//! reads from it, once per dispatch, and shares one handle across all
//! delivery sequences.

use std::{future::Future, pin::Pin, sync::Arc};

use hookline_core::{
    error::{CoreError, Result},
    EventKind, Subscriber, SubscriberId, TenantId,
};
use tokio::sync::RwLock;

/// Read-only source of subscribers for a tenant event.
pub trait SubscriptionRegistry: Send + Sync + 'static {
    /// Lists active subscribers of `tenant_id` that want `kind`.
    ///
    /// Results are ordered by subscriber creation so repeated dispatches of
    /// the same event against unchanged registry state target subscribers
    /// in the same order. Calling this twice without an intervening
    /// mutation returns the same sequence.
    fn list_subscribers<'a>(
        &'a self,
        tenant_id: TenantId,
        kind: &'a EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscriber>>> + Send + 'a>>;
}

impl<R: SubscriptionRegistry + ?Sized> SubscriptionRegistry for Arc<R> {
    fn list_subscribers<'a>(
        &'a self,
        tenant_id: TenantId,
        kind: &'a EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscriber>>> + Send + 'a>> {
        (**self).list_subscribers(tenant_id, kind)
    }
}

/// In-memory registry keeping subscribers in insertion order.
///
/// Backs tests and embedders without a database. Supports injecting a
/// one-shot failure to exercise the dispatcher's precondition path.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionRegistry {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    failure: Arc<RwLock<Option<CoreError>>>,
}

impl InMemorySubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber, replacing any existing one with the same id
    /// in place.
    pub async fn register(&self, subscriber: Subscriber) {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.iter_mut().find(|s| s.id == subscriber.id) {
            Some(existing) => *existing = subscriber,
            None => subscribers.push(subscriber),
        }
    }

    /// Marks a subscriber inactive. Returns `false` if it is unknown.
    pub async fn deactivate(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        subscribers.iter_mut().find(|s| s.id == id).map(|s| s.is_active = false).is_some()
    }

    /// Removes a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no subscriber has this id.
    pub async fn remove(&self, id: SubscriberId) -> Result<Subscriber> {
        let mut subscribers = self.subscribers.write().await;
        let index = subscribers
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))?;
        Ok(subscribers.remove(index))
    }

    /// Makes the next `list_subscribers` call fail with `error`.
    pub async fn inject_failure(&self, error: CoreError) {
        *self.failure.write().await = Some(error);
    }

    /// Number of registered subscribers, active or not.
    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }
}

impl SubscriptionRegistry for InMemorySubscriptionRegistry {
    fn list_subscribers<'a>(
        &'a self,
        tenant_id: TenantId,
        kind: &'a EventKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscriber>>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(error) = self.failure.write().await.take() {
                return Err(error);
            }

            let subscribers = self.subscribers.read().await;
            Ok(subscribers
                .iter()
                .filter(|s| s.tenant_id == tenant_id && s.wants(kind))
                .cloned()
                .collect())
        })
    }
}
