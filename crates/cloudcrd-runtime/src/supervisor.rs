//! Controller Supervisor: starts and stops every kind's unit together

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cloudcrd_common::ResourceKind;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::SupervisorError;
use crate::unit::ManagedUnit;

/// Supervisor settings
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Workers spawned per kind
    pub workers_per_kind: usize,
    /// How long startup waits for every cache to sync
    pub cache_sync_timeout: Duration,
    /// How often sync status is polled during startup
    pub sync_poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers_per_kind: 1,
            cache_sync_timeout: Duration::from_secs(60),
            sync_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Owns one [`ManagedUnit`] per kind
pub struct Supervisor {
    config: SupervisorConfig,
    units: BTreeMap<ResourceKind, Arc<dyn ManagedUnit>>,
}

impl Supervisor {
    /// Supervisor with no units registered
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            units: BTreeMap::new(),
        }
    }

    /// Register the unit for one kind
    pub fn register(&mut self, unit: Arc<dyn ManagedUnit>) -> Result<(), SupervisorError> {
        let kind = unit.kind();
        if self.units.contains_key(&kind) {
            return Err(SupervisorError::DuplicateKind(kind));
        }
        self.units.insert(kind, unit);
        Ok(())
    }

    /// Registered kinds in order
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.units.keys().copied().collect()
    }

    /// Run every unit until `shutdown` is cancelled.
    ///
    /// Caches start first; workers only start once all of them have synced. A
    /// sync timeout is returned as an error after everything started so far
    /// has been stopped.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let caches = shutdown.child_token();
        let mut cache_tasks = Vec::new();
        for unit in self.units.values() {
            cache_tasks.extend(unit.clone().start_cache(caches.clone()));
        }

        info!(kinds = ?self.kinds(), "waiting for caches to sync");
        if let Err(e) = self.wait_for_sync(&shutdown).await {
            caches.cancel();
            self.shut_down_queues();
            join_all("cache", cache_tasks).await;
            return Err(e);
        }

        let mut workers = Vec::new();
        for unit in self.units.values() {
            workers.extend(unit.clone().spawn_workers(self.config.workers_per_kind));
        }
        info!(
            workers_per_kind = self.config.workers_per_kind,
            "caches synced, workers started"
        );

        shutdown.cancelled().await;
        info!("shutdown requested, draining workers");

        caches.cancel();
        self.shut_down_queues();
        join_all("worker", workers).await;
        join_all("cache", cache_tasks).await;

        info!("all units stopped");
        Ok(())
    }

    async fn wait_for_sync(&self, shutdown: &CancellationToken) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.config.cache_sync_timeout;
        loop {
            let pending: Vec<ResourceKind> = self
                .units
                .values()
                .filter(|unit| !unit.has_synced())
                .map(|unit| unit.kind())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!(kinds = ?pending, "caches did not sync in time");
                return Err(SupervisorError::CacheSyncTimeout {
                    kinds: pending,
                    timeout_secs: self.config.cache_sync_timeout.as_secs(),
                });
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Err(SupervisorError::Cancelled),
                _ = tokio::time::sleep(self.config.sync_poll_interval) => {}
            }
        }
    }

    fn shut_down_queues(&self) {
        for unit in self.units.values() {
            unit.shut_down();
        }
    }
}

async fn join_all(what: &str, handles: Vec<JoinHandle<()>>) {
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(task = what, error = %e, "task ended abnormally");
        }
    }
}
