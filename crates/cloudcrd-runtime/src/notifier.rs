//! Turns watch events into typed notifications.
//!
//! The notifier remembers the last snapshot of every object it has seen. That
//! is what a Delete notification carries, and it is what lets a re-list after
//! a watch disconnect produce deletes for objects that vanished while the
//! watch was down.
//!
//! Objects delivered during a (re-)list are only visible in the reflector
//! store once the list completes, so their notifications are held back until
//! `InitDone` as well.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kube::runtime::watcher;
use kube::Resource;
use tracing::{debug, warn};

use crate::key::ObjectKey;

/// A change to one object of a kind.
///
/// Notifications travel on a per-kind channel, so the kind is implied by the
/// channel they arrive on.
#[derive(Debug)]
pub enum Notification<K> {
    /// The object was added or modified; re-read it from the cache
    Upsert(ObjectKey),
    /// The object is gone; `last_known` is its final snapshot (tombstone)
    Delete {
        /// Key of the deleted object
        key: ObjectKey,
        /// Last snapshot seen before the deletion
        last_known: Arc<K>,
    },
}

impl<K> Notification<K> {
    /// Key of the object this notification concerns
    pub fn key(&self) -> &ObjectKey {
        match self {
            Notification::Upsert(key) => key,
            Notification::Delete { key, .. } => key,
        }
    }
}

/// Per-kind adapter from watcher events to [`Notification`]s
pub struct ChangeNotifier<K> {
    last_known: HashMap<ObjectKey, Arc<K>>,
    /// Keys seen since the current re-list began, `None` outside a re-list
    relisted: Option<HashSet<ObjectKey>>,
    /// Upserts held back until the current re-list completes
    pending: Vec<Notification<K>>,
}

impl<K> Default for ChangeNotifier<K> {
    fn default() -> Self {
        Self {
            last_known: HashMap::new(),
            relisted: None,
            pending: Vec::new(),
        }
    }
}

impl<K> ChangeNotifier<K>
where
    K: Resource + Clone,
{
    /// Create a notifier that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently remembered
    pub fn tracked(&self) -> usize {
        self.last_known.len()
    }

    /// Translate one watcher event, updating the remembered snapshots
    pub fn observe(&mut self, event: &watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => self.delete(obj).into_iter().collect(),
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                self.pending.clear();
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(notification) = self.upsert(obj) {
                    if let Some(seen) = self.relisted.as_mut() {
                        seen.insert(notification.key().clone());
                    }
                    self.pending.push(notification);
                }
                Vec::new()
            }
            watcher::Event::InitDone => self.finish_relist(),
        }
    }

    fn upsert(&mut self, obj: &K) -> Option<Notification<K>> {
        let key = match ObjectKey::from_resource(obj) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "ignoring watch event for object without a name");
                return None;
            }
        };
        self.last_known.insert(key.clone(), Arc::new(obj.clone()));
        Some(Notification::Upsert(key))
    }

    fn delete(&mut self, obj: &K) -> Option<Notification<K>> {
        let key = match ObjectKey::from_resource(obj) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "ignoring delete event for object without a name");
                return None;
            }
        };
        self.last_known.remove(&key);
        Some(Notification::Delete {
            key,
            last_known: Arc::new(obj.clone()),
        })
    }

    /// Release held upserts, then emit deletes for every remembered object
    /// missing from the fresh list
    fn finish_relist(&mut self) -> Vec<Notification<K>> {
        let mut out = std::mem::take(&mut self.pending);
        let Some(seen) = self.relisted.take() else {
            return out;
        };

        let vanished: Vec<ObjectKey> = self
            .last_known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        out.extend(vanished.into_iter().filter_map(|key| {
            let last_known = self.last_known.remove(&key)?;
            debug!(key = %key, "object vanished during re-list, emitting tombstone");
            Some(Notification::Delete { key, last_known })
        }));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcrd_common::crd::{Instance, InstanceSpec};

    fn instance(name: &str, machine_type: &str) -> Instance {
        let mut obj = Instance::new(
            name,
            InstanceSpec {
                machine_type: machine_type.to_string(),
                ..Default::default()
            },
        );
        obj.metadata.namespace = Some("ns".to_string());
        obj
    }

    fn keys(notifications: &[Notification<Instance>]) -> Vec<String> {
        notifications.iter().map(|n| n.key().to_string()).collect()
    }

    #[test]
    fn apply_becomes_upsert() {
        let mut notifier = ChangeNotifier::new();
        let out = notifier.observe(&watcher::Event::Apply(instance("web-1", "n1-standard-1")));
        assert!(matches!(out.as_slice(), [Notification::Upsert(k)] if k.to_string() == "ns/web-1"));
        assert_eq!(notifier.tracked(), 1);
    }

    #[test]
    fn delete_carries_the_final_snapshot() {
        let mut notifier = ChangeNotifier::new();
        notifier.observe(&watcher::Event::Apply(instance("web-1", "n1-standard-1")));
        let out = notifier.observe(&watcher::Event::Delete(instance("web-1", "n1-standard-2")));

        match out.as_slice() {
            [Notification::Delete { key, last_known }] => {
                assert_eq!(key.to_string(), "ns/web-1");
                assert_eq!(last_known.spec.machine_type, "n1-standard-2");
            }
            other => panic!("expected one delete, got {:?}", keys(other)),
        }
        assert_eq!(notifier.tracked(), 0);
    }

    /// Story: the watch drops, `web-2` is deleted while it is down, and the
    /// re-list no longer contains it. The controller still learns about the
    /// deletion, with the snapshot it last saw.
    #[test]
    fn story_relist_emits_tombstones_for_vanished_objects() {
        let mut notifier = ChangeNotifier::new();
        notifier.observe(&watcher::Event::Apply(instance("web-1", "a")));
        notifier.observe(&watcher::Event::Apply(instance("web-2", "b")));

        assert!(notifier.observe(&watcher::Event::Init).is_empty());
        assert!(notifier
            .observe(&watcher::Event::InitApply(instance("web-1", "a")))
            .is_empty());

        let done = notifier.observe(&watcher::Event::InitDone);
        match done.as_slice() {
            [Notification::Upsert(kept), Notification::Delete { key, last_known }] => {
                assert_eq!(kept.to_string(), "ns/web-1");
                assert_eq!(key.to_string(), "ns/web-2");
                assert_eq!(last_known.spec.machine_type, "b");
            }
            other => panic!("expected one tombstone, got {:?}", keys(other)),
        }
        assert_eq!(notifier.tracked(), 1);
    }

    #[test]
    fn initial_list_releases_upserts_at_init_done() {
        let mut notifier = ChangeNotifier::new();
        notifier.observe(&watcher::Event::Init);
        notifier.observe(&watcher::Event::InitApply(instance("web-1", "a")));
        notifier.observe(&watcher::Event::InitApply(instance("web-2", "a")));

        let done = notifier.observe(&watcher::Event::InitDone);
        assert_eq!(keys(&done), vec!["ns/web-1", "ns/web-2"]);
        assert!(done.iter().all(|n| matches!(n, Notification::Upsert(_))));
    }

    #[test]
    fn unnamed_objects_are_skipped() {
        let mut notifier = ChangeNotifier::<Instance>::new();
        let mut obj = instance("x", "a");
        obj.metadata.name = None;
        assert!(notifier.observe(&watcher::Event::Apply(obj)).is_empty());
        assert_eq!(notifier.tracked(), 0);
    }
}
