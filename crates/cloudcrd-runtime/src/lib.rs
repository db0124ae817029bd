//! Generic reconciliation engine for cloudcrd
//!
//! Cache events become [`Notification`]s, notifications become keys in a
//! per-kind [`WorkQueue`], and a pool of workers pops keys and hands the
//! current object to a [`Reconciler`]. The [`Supervisor`] owns every kind's
//! [`ReconcileUnit`] and drives startup and shutdown for all of them together.
//!
//! ```text
//! ObjectCache --Notification--> ReconcileUnit::dispatch --> WorkQueue
//!                                                              |
//!                     Reconciler <-- worker (get/sync/done) <--+
//! ```

#![deny(missing_docs)]

pub mod cache;
pub mod error;
pub mod key;
pub mod kube_cache;
pub mod notifier;
pub mod queue;
pub mod ratelimit;
pub mod supervisor;
pub mod unit;

pub use cache::{CacheDriver, MemoryCache, ObjectCache};
pub use error::{KeyError, SupervisorError};
pub use key::ObjectKey;
pub use kube_cache::KubeCache;
pub use notifier::{ChangeNotifier, Notification};
pub use queue::WorkQueue;
pub use ratelimit::{default_controller_limiter, RateLimiter};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use unit::{ManagedUnit, ReconcileUnit, Reconciler};
