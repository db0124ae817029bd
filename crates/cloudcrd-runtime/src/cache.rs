//! Object Cache capability and an in-memory implementation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::key::ObjectKey;
use crate::notifier::Notification;

/// Read side of a per-kind object cache
pub trait ObjectCache<K>: Send + Sync {
    /// Current snapshot of the object, if the cache holds it
    fn get(&self, key: &ObjectKey) -> Option<Arc<K>>;

    /// Every object currently cached
    fn list(&self) -> Vec<Arc<K>>;

    /// Whether the initial listing has completed
    fn has_synced(&self) -> bool;
}

/// A cache that keeps itself current and reports changes.
///
/// `run` owns the cache's background work until `cancel` fires. Each change is
/// applied to the cache before its notification is sent, so a receiver that
/// looks the key up afterwards sees the new state.
#[async_trait]
pub trait CacheDriver<K: Send + Sync + 'static>: ObjectCache<K> {
    /// Maintain the cache and forward notifications until cancelled
    async fn run(
        self: Arc<Self>,
        notifications: mpsc::UnboundedSender<Notification<K>>,
        cancel: CancellationToken,
    );
}

/// Cache backed by a map, fed by explicit [`MemoryCache::apply`] and
/// [`MemoryCache::delete`] calls.
///
/// Used for tests and for wiring a kind whose objects come from somewhere
/// other than a watch. It reports synced as soon as it is run.
pub struct MemoryCache<K> {
    objects: Mutex<BTreeMap<ObjectKey, Arc<K>>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Notification<K>>>>,
    synced: AtomicBool,
    sync_on_run: bool,
}

impl<K> Default for MemoryCache<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            subscriber: Mutex::new(None),
            synced: AtomicBool::new(false),
            sync_on_run: true,
        }
    }
}

impl<K> MemoryCache<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Empty, not yet synced cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that never reports initial sync, even when run
    pub fn never_syncing() -> Self {
        Self {
            sync_on_run: false,
            ..Self::default()
        }
    }

    /// Cache pre-filled with `objects` and already marked synced
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let cache = Self::new();
        for obj in objects {
            cache.apply(obj);
        }
        cache.synced.store(true, Ordering::SeqCst);
        cache
    }

    /// Insert or replace an object, notifying the running driver if any
    pub fn apply(&self, obj: K) {
        let key = match ObjectKey::from_resource(&obj) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "ignoring object without a name");
                return;
            }
        };
        self.objects.lock().insert(key.clone(), Arc::new(obj));
        self.notify(Notification::Upsert(key));
    }

    /// Remove an object, sending its last snapshot as a tombstone
    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let last_known = self.objects.lock().remove(key)?;
        self.notify(Notification::Delete {
            key: key.clone(),
            last_known: last_known.clone(),
        });
        Some(last_known)
    }

    fn notify(&self, notification: Notification<K>) {
        if let Some(tx) = self.subscriber.lock().as_ref() {
            // Receiver gone means the driver stopped; the map is still current.
            let _ = tx.send(notification);
        }
    }
}

impl<K> ObjectCache<K> for MemoryCache<K>
where
    K: Send + Sync,
{
    fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.lock().get(key).cloned()
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.objects.lock().values().cloned().collect()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K> CacheDriver<K> for MemoryCache<K>
where
    K: Resource + Send + Sync + 'static,
{
    async fn run(
        self: Arc<Self>,
        notifications: mpsc::UnboundedSender<Notification<K>>,
        cancel: CancellationToken,
    ) {
        {
            let objects = self.objects.lock();
            for key in objects.keys() {
                let _ = notifications.send(Notification::Upsert(key.clone()));
            }
            *self.subscriber.lock() = Some(notifications);
        }
        if self.sync_on_run {
            self.synced.store(true, Ordering::SeqCst);
        }

        cancel.cancelled().await;
        self.subscriber.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcrd_common::crd::{Project, ProjectSpec};

    fn project(name: &str) -> Project {
        let mut obj = Project::new(name, ProjectSpec::default());
        obj.metadata.namespace = Some("ns".to_string());
        obj
    }

    #[test]
    fn lookups_by_key() {
        let cache = MemoryCache::with_objects([project("p1"), project("p2")]);
        assert!(cache.has_synced());
        assert!(cache.get(&ObjectKey::new("ns", "p1")).is_some());
        assert!(cache.get(&ObjectKey::new("other", "p1")).is_none());
        assert_eq!(cache.list().len(), 2);
    }

    #[tokio::test]
    async fn running_cache_reports_existing_and_new_objects() {
        let cache = Arc::new(MemoryCache::with_objects([project("p1")]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(cache.clone().run(tx, cancel.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key(), &ObjectKey::new("ns", "p1"));

        cache.apply(project("p2"));
        assert!(matches!(rx.recv().await.unwrap(), Notification::Upsert(k) if k.name == "p2"));

        cache.delete(&ObjectKey::new("ns", "p1"));
        match rx.recv().await.unwrap() {
            Notification::Delete { key, last_known } => {
                assert_eq!(key.name, "p1");
                assert_eq!(last_known.metadata.name.as_deref(), Some("p1"));
            }
            Notification::Upsert(k) => panic!("expected delete, got upsert of {}", k),
        }
        assert!(cache.get(&ObjectKey::new("ns", "p1")).is_none());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn never_syncing_cache_stays_unsynced() {
        let cache = Arc::new(MemoryCache::<Project>::never_syncing());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(cache.clone().run(tx, cancel.clone()));
        tokio::task::yield_now().await;
        assert!(!cache.has_synced());
        cancel.cancel();
        task.await.unwrap();
    }
}
