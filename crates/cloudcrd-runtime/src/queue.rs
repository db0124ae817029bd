//! Deduplicating, rate-limited work queue.
//!
//! Set semantics: a key is either absent, queued (once), or in flight. Adding a
//! key that is already queued is a no-op. Adding a key that is in flight marks
//! it dirty; it is queued again when the worker calls [`WorkQueue::done`]. A
//! key is therefore never handed to two workers at the same time.
//!
//! Retry timing lives in a [`RateLimiter`]: [`WorkQueue::add_rate_limited`]
//! asks it for a delay, [`WorkQueue::forget`] clears the key's history.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::key::ObjectKey;
use crate::ratelimit::{default_controller_limiter, RateLimiter};

/// Cloneable handle to a shared work queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    limiter: Box<dyn RateLimiter>,
}

#[derive(Default)]
struct State {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<ObjectKey>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<ObjectKey>,
    /// Keys currently held by a worker
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

impl WorkQueue {
    /// Create a queue with a custom retry policy
    pub fn new(name: impl Into<String>, limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// Create a queue using [`default_controller_limiter`]
    pub fn with_default_limiter(name: impl Into<String>) -> Self {
        Self::new(name, default_controller_limiter())
    }

    /// Mark `key` as needing processing.
    ///
    /// No-op if already queued or if the queue is shutting down. If the key is
    /// in flight it will be redelivered after the current attempt is done.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, key = %key, "key in flight, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down and has no queued keys left.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release the in-flight mark on `key`, requeueing it if it went dirty.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear retry history for `key` (after success or a permanent failure)
    pub fn forget(&self, key: &ObjectKey) {
        self.inner.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Re-add `key` after the delay chosen by the rate limiter
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let delay = self.inner.limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Re-add `key` after `delay`
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        trace!(
            queue = %self.inner.name,
            key = %key,
            delay_ms = delay.as_millis() as u64,
            "delaying key"
        );
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Stop accepting new keys and wake every blocked [`WorkQueue::get`]
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting for a worker (in-flight keys not included)
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ItemExponentialLimiter;
    use tokio::time::timeout;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("ns", name)
    }

    fn queue() -> WorkQueue {
        WorkQueue::new(
            "test",
            Box::new(ItemExponentialLimiter::new(
                Duration::from_millis(5),
                Duration::from_secs(1000),
            )),
        )
    }

    #[tokio::test]
    async fn duplicate_adds_collapse_into_one_delivery() {
        let q = queue();
        q.add(key("web-1"));
        q.add(key("web-1"));
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await, Some(key("web-1")));
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 1);
    }

    #[tokio::test]
    async fn keys_are_delivered_in_arrival_order() {
        let q = queue();
        q.add(key("a"));
        q.add(key("b"));
        q.add(key("a"));

        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, Some(key("b")));
    }

    /// Story: an update arriving while a worker is busy with the same object
    /// is not lost and is not handed to a second worker either.
    #[tokio::test(start_paused = true)]
    async fn story_dirty_key_redelivered_after_done() {
        let q = queue();
        q.add(key("web-1"));
        let first = q.get().await.unwrap();

        q.add(key("web-1"));
        assert!(q.is_empty(), "in-flight key must not be queued twice");
        assert!(
            timeout(Duration::from_millis(50), q.get()).await.is_err(),
            "in-flight key must not reach a second worker"
        );

        q.done(&first);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key("web-1")));
    }

    #[tokio::test]
    async fn done_without_dirty_does_not_requeue() {
        let q = queue();
        q.add(key("web-1"));
        let k = q.get().await.unwrap();
        q.done(&k);
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn get_blocks_until_a_key_arrives() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add(key("late"));

        let got = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(got, Some(key("late")));
    }

    #[tokio::test]
    async fn concurrent_waiters_each_get_a_distinct_key() {
        let q = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect();
        tokio::task::yield_now().await;
        for name in ["a", "b", "c"] {
            q.add(key(name));
        }

        let mut got = Vec::new();
        for w in waiters {
            got.push(timeout(Duration::from_secs(5), w).await.unwrap().unwrap().unwrap());
        }
        got.sort();
        assert_eq!(got, vec![key("a"), key("b"), key("c")]);
    }

    #[tokio::test]
    async fn shutdown_releases_blocked_getters() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down();

        let got = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_keys_first() {
        let q = queue();
        q.add(key("a"));
        q.shut_down();
        q.add(key("b"));

        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_waits_for_backoff() {
        let q = queue();
        q.add_rate_limited(key("web-1"));
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(4)).await;
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(q.get().await, Some(key("web-1")));
        assert_eq!(q.num_requeues(&key("web-1")), 1);
    }

    /// Story: a key that failed twice, then succeeded, starts over at the
    /// minimum delay when it fails again.
    #[tokio::test(start_paused = true)]
    async fn story_forget_resets_retry_delay() {
        let q = queue();
        let k = key("web-1");

        q.add_rate_limited(k.clone());
        q.add_rate_limited(k.clone());
        assert_eq!(q.num_requeues(&k), 2);

        q.forget(&k);
        assert_eq!(q.num_requeues(&k), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = q.get().await.unwrap();
        q.done(&got);

        q.add_rate_limited(k.clone());
        tokio::time::sleep(Duration::from_millis(4)).await;
        assert!(q.is_empty(), "delay should be back at the 5ms minimum, not earlier");
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(q.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_add_after_shutdown_is_dropped() {
        let q = queue();
        q.add_after(key("web-1"), Duration::from_millis(10));
        q.shut_down();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.get().await, None);
    }
}
