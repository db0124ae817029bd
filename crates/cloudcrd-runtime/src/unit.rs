//! Per-kind reconciliation unit: cache handle, work queue and worker pool
//!
//! One [`ReconcileUnit`] exists per [`ResourceKind`]. Notifications from the
//! kind's cache are dispatched into its queue; workers pop keys, re-read the
//! object and call the kind's [`Reconciler`].
//!
//! Deletes go through the same queue. The unit keeps the tombstone handed over
//! by a Delete notification; a worker that finds no live object for a key
//! reconciles the delete using that snapshot. Routing deletes this way keeps
//! the at-most-one-worker-per-key guarantee and the backoff retry for failed
//! deletes.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::{ReconcileError, ResourceKind};
use futures::FutureExt;
use kube::Resource;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::cache::CacheDriver;
use crate::key::ObjectKey;
use crate::notifier::Notification;
use crate::queue::WorkQueue;

/// Kind-specific synchronization logic
#[async_trait]
pub trait Reconciler<K>: Send + Sync + 'static {
    /// Drive the external state toward the object's declared spec
    async fn create_or_update(&self, obj: Arc<K>) -> Result<(), ReconcileError>;

    /// Remove the external state of a deleted object
    async fn delete(&self, obj: Arc<K>) -> Result<(), ReconcileError>;
}

/// What a unit looks like to the supervisor, independent of its object type
pub trait ManagedUnit: Send + Sync {
    /// Kind this unit reconciles
    fn kind(&self) -> ResourceKind;

    /// Whether the unit's cache has completed its initial listing
    fn has_synced(&self) -> bool;

    /// Spawn the cache driver and the notification dispatcher
    fn start_cache(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>>;

    /// Spawn `count` workers; each exits once the queue is shut down and empty
    fn spawn_workers(self: Arc<Self>, count: usize) -> Vec<JoinHandle<()>>;

    /// Stop accepting work and release idle workers
    fn shut_down(&self);
}

/// Queue, cache handle and reconciler for one kind
pub struct ReconcileUnit<K: Send + Sync + 'static, R> {
    kind: ResourceKind,
    cache: Arc<dyn CacheDriver<K>>,
    queue: WorkQueue,
    reconciler: R,
    tombstones: Mutex<HashMap<ObjectKey, Arc<K>>>,
}

/// Releases a key's in-flight mark on every exit path of a worker iteration
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: &'a ObjectKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

impl<K, R> ReconcileUnit<K, R>
where
    K: Resource + Send + Sync + 'static,
    R: Reconciler<K>,
{
    /// Unit with the default controller rate limiter
    pub fn new(kind: ResourceKind, cache: Arc<dyn CacheDriver<K>>, reconciler: R) -> Self {
        Self::with_queue(kind, cache, reconciler, WorkQueue::with_default_limiter(kind.as_str()))
    }

    /// Unit using the given queue
    pub fn with_queue(
        kind: ResourceKind,
        cache: Arc<dyn CacheDriver<K>>,
        reconciler: R,
        queue: WorkQueue,
    ) -> Self {
        Self {
            kind,
            cache,
            queue,
            reconciler,
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    /// The unit's work queue
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// The unit's reconciler
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Number of deletes waiting to be reconciled
    pub fn pending_deletes(&self) -> usize {
        self.tombstones.lock().len()
    }

    /// Route one notification into the queue
    pub fn dispatch(&self, notification: Notification<K>) {
        match notification {
            Notification::Upsert(key) => {
                debug!(kind = %self.kind, key = %key, "enqueue");
                self.queue.add(key);
            }
            Notification::Delete { key, last_known } => {
                debug!(kind = %self.kind, key = %key, "enqueue delete");
                self.tombstones.lock().insert(key.clone(), last_known);
                self.queue.add(key);
            }
        }
    }

    /// Take one key off the queue and reconcile it.
    ///
    /// Returns `false` once the queue is shut down and drained.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let _in_flight = InFlight {
            queue: &self.queue,
            key: &key,
        };

        let span = info_span!("reconcile", kind = %self.kind, key = %key);
        let result = AssertUnwindSafe(self.sync(&key))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(())) => {
                self.queue.forget(&key);
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!(
                    kind = %self.kind,
                    key = %key,
                    error = %e,
                    requeues = self.queue.num_requeues(&key),
                    "reconcile failed, will retry"
                );
                self.queue.add_rate_limited(key.clone());
            }
            Ok(Err(e)) => {
                error!(
                    kind = %self.kind,
                    key = %key,
                    error = %e,
                    "reconcile failed permanently, dropping key"
                );
                self.queue.forget(&key);
                self.tombstones.lock().remove(&key);
            }
            Err(panic) => {
                error!(
                    kind = %self.kind,
                    key = %key,
                    panic = %panic_message(panic.as_ref()),
                    "reconciler panicked, will retry"
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
        true
    }

    /// Reconcile the current state of `key`.
    ///
    /// The tombstone is read after the live object. A tombstone for the same
    /// uid means the read raced the object's removal, so the delete wins.
    async fn sync(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let live = self.cache.get(key);
        let tombstone = self.tombstones.lock().get(key).cloned();

        match (live, tombstone) {
            (Some(obj), Some(last_known)) if !same_object(&*obj, &*last_known) => {
                debug!("object re-created before its delete was reconciled");
                self.clear_tombstone(key, &last_known);
                self.reconciler.create_or_update(obj).await
            }
            (Some(obj), None) => self.reconciler.create_or_update(obj).await,
            (_, Some(last_known)) => {
                self.reconciler.delete(last_known.clone()).await?;
                self.clear_tombstone(key, &last_known);
                Ok(())
            }
            (None, None) => {
                debug!("object no longer exists, nothing to do");
                Ok(())
            }
        }
    }

    /// Remove the tombstone for `key` unless a newer one replaced it
    fn clear_tombstone(&self, key: &ObjectKey, handled: &Arc<K>) {
        let mut tombstones = self.tombstones.lock();
        if tombstones
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, handled))
        {
            tombstones.remove(key);
        }
    }

    async fn run_worker(self: Arc<Self>, id: usize) {
        debug!(kind = %self.kind, worker = id, "worker started");
        while self.process_next().await {}
        debug!(kind = %self.kind, worker = id, "worker stopped");
    }

    async fn run_dispatcher(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Notification<K>>) {
        while let Some(notification) = rx.recv().await {
            self.dispatch(notification);
        }
        debug!(kind = %self.kind, "dispatcher stopped");
    }
}

impl<K, R> ManagedUnit for ReconcileUnit<K, R>
where
    K: Resource + Send + Sync + 'static,
    R: Reconciler<K>,
{
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn has_synced(&self) -> bool {
        self.cache.has_synced()
    }

    fn start_cache(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = tokio::spawn(self.cache.clone().run(tx, cancel));
        let dispatcher = tokio::spawn(self.run_dispatcher(rx));
        vec![cache, dispatcher]
    }

    fn spawn_workers(self: Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|id| tokio::spawn(self.clone().run_worker(id)))
            .collect()
    }

    fn shut_down(&self) {
        self.queue.shut_down();
    }
}

fn same_object<K: Resource>(a: &K, b: &K) -> bool {
    matches!(
        (a.meta().uid.as_deref(), b.meta().uid.as_deref()),
        (Some(x), Some(y)) if x == y
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
