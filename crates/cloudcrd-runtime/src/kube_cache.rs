//! Object Cache fed by a Kubernetes watch

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::ResourceKind;
use futures::StreamExt;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheDriver, ObjectCache};
use crate::key::ObjectKey;
use crate::notifier::{ChangeNotifier, Notification};

/// Server-side watch timeout in seconds.
///
/// Shorter than the client's read timeout so the API server closes idle
/// watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Cache of every object of one kind across all namespaces, kept current by
/// a reflector over a backoff-wrapped watch
pub struct KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: ResourceKind,
    api: Api<K>,
    store: Store<K>,
    writer: Mutex<Option<reflector::store::Writer<K>>>,
    synced: AtomicBool,
}

impl<K> KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Cache over all namespaces
    pub fn new(client: Client, kind: ResourceKind) -> Self {
        Self::with_api(Api::all(client), kind)
    }

    /// Cache over the objects visible through `api`
    pub fn with_api(api: Api<K>, kind: ResourceKind) -> Self {
        let (store, writer) = reflector::store();
        Self {
            kind,
            api,
            store,
            writer: Mutex::new(Some(writer)),
            synced: AtomicBool::new(false),
        }
    }

    fn apply(
        &self,
        writer: &mut reflector::store::Writer<K>,
        notifier: &mut ChangeNotifier<K>,
        event: watcher::Event<K>,
    ) -> Vec<Notification<K>> {
        writer.apply_watcher_event(&event);
        if matches!(event, watcher::Event::InitDone) && !self.synced.swap(true, Ordering::SeqCst) {
            info!(kind = %self.kind, objects = self.store.state().len(), "cache synced");
        }
        notifier.observe(&event)
    }
}

impl<K> ObjectCache<K> for KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let mut obj_ref = ObjectRef::new(&key.name);
        if !key.namespace.is_empty() {
            obj_ref = obj_ref.within(&key.namespace);
        }
        self.store.get(&obj_ref)
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K> CacheDriver<K> for KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn run(
        self: Arc<Self>,
        notifications: mpsc::UnboundedSender<Notification<K>>,
        cancel: CancellationToken,
    ) {
        let Some(mut writer) = self.writer.lock().take() else {
            warn!(kind = %self.kind, "cache is already running");
            return;
        };
        let mut notifier = ChangeNotifier::new();

        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = watcher(self.api.clone(), config).default_backoff();
        let mut stream = std::pin::pin!(stream);

        info!(kind = %self.kind, "starting watch");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(kind = %self.kind, "watch cancelled");
                    break;
                }
                event = stream.next() => {
                    match event {
                        Some(Ok(event)) => {
                            for notification in self.apply(&mut writer, &mut notifier, event) {
                                if notifications.send(notification).is_err() {
                                    debug!(kind = %self.kind, "notification receiver dropped");
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // default_backoff re-establishes the watch
                            warn!(kind = %self.kind, error = %e, "watch error");
                        }
                        None => {
                            warn!(kind = %self.kind, "watch stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcrd_common::crd::{Instance, InstanceSpec};

    fn instance(name: &str) -> Instance {
        let mut obj = Instance::new(name, InstanceSpec::default());
        obj.metadata.namespace = Some("ns".to_string());
        obj
    }

    fn offline_cache() -> KubeCache<Instance> {
        // A client that is never used for requests; only the store is exercised.
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let client = Client::try_from(config).unwrap();
        KubeCache::new(client, ResourceKind::Instance)
    }

    /// Story: objects listed by the watch are visible by key once the initial
    /// list completes, and the cache only reports synced at that point.
    #[tokio::test]
    async fn story_store_and_notifications_follow_the_initial_list() {
        let cache = offline_cache();
        let mut writer = cache.writer.lock().take().unwrap();
        let mut notifier = ChangeNotifier::new();

        cache.apply(&mut writer, &mut notifier, watcher::Event::Init);
        let out = cache.apply(
            &mut writer,
            &mut notifier,
            watcher::Event::InitApply(instance("web-1")),
        );
        assert!(out.is_empty());
        assert!(!cache.has_synced());

        let out = cache.apply(&mut writer, &mut notifier, watcher::Event::InitDone);
        assert_eq!(out.len(), 1);
        assert!(cache.has_synced());
        assert!(cache.get(&ObjectKey::new("ns", "web-1")).is_some());
        assert!(cache.get(&ObjectKey::new("other", "web-1")).is_none());
        assert_eq!(cache.list().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_store_before_notifying() {
        let cache = offline_cache();
        let mut writer = cache.writer.lock().take().unwrap();
        let mut notifier = ChangeNotifier::new();

        cache.apply(&mut writer, &mut notifier, watcher::Event::Apply(instance("web-1")));
        let out = cache.apply(
            &mut writer,
            &mut notifier,
            watcher::Event::Delete(instance("web-1")),
        );

        assert!(matches!(out.as_slice(), [Notification::Delete { .. }]));
        assert!(cache.get(&ObjectKey::new("ns", "web-1")).is_none());
    }
}
