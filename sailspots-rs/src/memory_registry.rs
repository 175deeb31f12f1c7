//! In-memory registry. Clones share state, so two sessions holding clones behave like two devices
//! signed in to the same account.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether::{FavoriteRecord, PlaceId, SyncError};
use tokio::sync::watch;

use crate::registry::{FavoriteRegistry, RegistrySubscription, SnapshotSender};

#[derive(Default)]
struct Inner {
    records: BTreeMap<PlaceId, FavoriteRecord>,
    subscribers: Vec<SnapshotSender>,
    offline: bool,
    rejected_writes: usize,
}

impl Inner {
    fn ids(&self) -> Vec<PlaceId> {
        self.records.keys().cloned().collect()
    }

    /// Push the full set to every live subscriber, forgetting the ones that went away.
    fn push(&mut self) {
        if self.offline {
            return;
        }
        let ids = self.ids();
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(Ok(ids.clone())).is_ok());
    }

    fn check_write(&mut self, id: &str) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::ProviderUnavailable(
                "registry unreachable".to_string(),
            ));
        }
        if self.rejected_writes > 0 {
            self.rejected_writes -= 1;
            return Err(SyncError::WriteConflict(format!("write to {id} rejected")));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
    /// `true` while writes may complete.
    writes_open: Arc<watch::Sender<bool>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            writes_open: Arc::new(watch::Sender::new(true)),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = FavoriteRecord>) -> Self {
        let registry = Self::new();
        registry.lock().records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        registry
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While offline every call fails with `ProviderUnavailable` and nothing is pushed.
    /// Coming back online pushes the current set.
    pub fn set_offline(&self, offline: bool) {
        let mut inner = self.lock();
        inner.offline = offline;
        if !offline {
            inner.push();
        }
    }

    /// The next `count` writes fail with `WriteConflict`.
    pub fn reject_next_writes(&self, count: usize) {
        self.lock().rejected_writes = count;
    }

    /// Writes wait until [`Self::release_writes`]. Their outcome is decided on release.
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Every current subscription receives `SubscriptionLost` and is dropped.
    pub fn fail_subscriptions(&self, reason: &str) {
        let mut inner = self.lock();
        for subscriber in inner.subscribers.drain(..) {
            let _ = subscriber.unbounded_send(Err(SyncError::SubscriptionLost(reason.to_string())));
        }
    }

    /// Every current subscription ends without an error, as if the registry hung up.
    pub fn close_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    /// A change made elsewhere, e.g. on another device.
    pub fn remote_upsert(&self, record: FavoriteRecord) {
        let mut inner = self.lock();
        inner.records.insert(record.id.clone(), record);
        inner.push();
    }

    /// A removal made elsewhere. Pushes even when `id` wasn't stored, like a redelivery.
    pub fn remote_delete(&self, id: &str) {
        let mut inner = self.lock();
        inner.records.remove(id);
        inner.push();
    }

    pub fn records(&self) -> Vec<FavoriteRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<PlaceId> {
        self.lock().ids()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| !subscriber.is_closed());
        inner.subscribers.len()
    }

    async fn wait_for_writes(&self) -> Result<(), SyncError> {
        let mut writes_open = self.writes_open.subscribe();
        writes_open
            .wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))
    }
}

impl FavoriteRegistry for MemoryRegistry {
    async fn upsert(&self, id: &str, record: &FavoriteRecord) -> Result<(), SyncError> {
        if record.id != id {
            return Err(SyncError::InvalidIdentifier(id.to_string()));
        }
        self.wait_for_writes().await?;

        let mut inner = self.lock();
        inner.check_write(id)?;
        inner.records.insert(id.to_string(), record.clone());
        inner.push();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.wait_for_writes().await?;

        let mut inner = self.lock();
        inner.check_write(id)?;
        inner.records.remove(id);
        inner.push();
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<FavoriteRecord>, SyncError> {
        let inner = self.lock();
        if inner.offline {
            return Err(SyncError::ProviderUnavailable(
                "registry unreachable".to_string(),
            ));
        }
        Ok(inner.records.get(id).cloned())
    }

    fn subscribe(&self) -> RegistrySubscription {
        let (sender, subscription) = RegistrySubscription::channel();
        let mut inner = self.lock();
        if !inner.offline {
            let _ = sender.unbounded_send(Ok(inner.ids()));
        }
        inner.subscribers.push(sender);
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tether::Category;

    fn record(id: &str) -> FavoriteRecord {
        FavoriteRecord {
            id: id.to_string(),
            name: format!("Dock {id}"),
            address: String::new(),
            category: Category::Docks,
            coordinate: None,
        }
    }

    #[tokio::test]
    async fn test_subscription_gets_full_set_on_every_change() {
        let registry = MemoryRegistry::with_records([record("b")]);
        let mut subscription = registry.subscribe();
        assert_eq!(subscription.next().await, Some(Ok(vec!["b".to_string()])));

        registry.upsert("a", &record("a")).await.unwrap();
        assert_eq!(
            subscription.next().await,
            Some(Ok(vec!["a".to_string(), "b".to_string()]))
        );

        registry.delete("a").await.unwrap();
        registry.delete("b").await.unwrap();
        assert_eq!(subscription.next().await, Some(Ok(vec!["b".to_string()])));
        assert_eq!(subscription.next().await, Some(Ok(vec![])));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let device_a = MemoryRegistry::new();
        let device_b = device_a.clone();
        device_a.upsert("x", &record("x")).await.unwrap();
        assert_eq!(device_b.get_by_id("x").await, Ok(Some(record("x"))));
    }

    #[tokio::test]
    async fn test_offline_and_rejected_writes() {
        let registry = MemoryRegistry::new();

        registry.set_offline(true);
        assert!(matches!(
            registry.upsert("a", &record("a")).await,
            Err(SyncError::ProviderUnavailable(_))
        ));
        assert!(registry.get_by_id("a").await.is_err());
        registry.set_offline(false);

        registry.reject_next_writes(1);
        assert!(matches!(
            registry.upsert("a", &record("a")).await,
            Err(SyncError::WriteConflict(_))
        ));
        assert!(registry.upsert("a", &record("a")).await.is_ok());
        assert_eq!(registry.ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_requires_matching_id() {
        let registry = MemoryRegistry::new();
        assert_eq!(
            registry.upsert("a", &record("b")).await,
            Err(SyncError::InvalidIdentifier("a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let registry = MemoryRegistry::new();
        let mut subscription = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscription_reports_loss() {
        let registry = MemoryRegistry::new();
        let mut subscription = registry.subscribe();
        let _initial = subscription.next().await;

        registry.fail_subscriptions("permission denied");
        assert!(matches!(
            subscription.next().await,
            Some(Err(SyncError::SubscriptionLost(_)))
        ));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn test_closed_subscription_ends_stream() {
        let registry = MemoryRegistry::new();
        let mut subscription = registry.subscribe();
        assert_eq!(subscription.next().await, Some(Ok(vec![])));

        registry.close_subscriptions();
        assert_eq!(subscription.next().await, None);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_held_write_completes_on_release() {
        let registry = MemoryRegistry::new();
        registry.hold_writes();

        let rec = record("a");
        let write = registry.upsert("a", &rec);
        let release = async {
            tokio::task::yield_now().await;
            assert!(registry.ids().is_empty());
            registry.release_writes();
        };
        let (result, ()) = tokio::join!(write, release);

        assert!(result.is_ok());
        assert_eq!(registry.ids(), vec!["a".to_string()]);
    }
}
