//! Wires every kind into one supervisor
//!
//! Each kind gets its own cache, queue and reconciler. The Project cache is
//! shared with the Instance and Database reconcilers, which resolve their
//! `spec.project` reference through it.

use std::sync::Arc;

use cloudcrd_common::crd::{Database, Instance, Project};
use cloudcrd_common::events::{EventPublisher, KubeEventPublisher};
use cloudcrd_common::{ResourceKind, CONTROLLER_NAME};
use cloudcrd_controller::{
    AbsencePolicies, Context, DatabaseReconciler, GoogleProviderFactory, InstanceReconciler,
    KubeSecretReader, ProjectReconciler, ProviderFactory, SecretCredentialResolver,
};
use cloudcrd_runtime::{
    CacheDriver, KubeCache, ReconcileUnit, Supervisor, SupervisorConfig, SupervisorError,
};
use kube::Client;
use tracing::info;

/// Object caches for the three kinds
pub struct Caches<P, I, D> {
    /// Project cache, also read by the Instance and Database reconcilers
    pub projects: Arc<P>,
    /// Instance cache
    pub instances: Arc<I>,
    /// Database cache
    pub databases: Arc<D>,
}

impl Caches<KubeCache<Project>, KubeCache<Instance>, KubeCache<Database>> {
    /// Watch-backed caches over all namespaces
    pub fn watching(client: &Client) -> Self {
        Self {
            projects: Arc::new(KubeCache::new(client.clone(), ResourceKind::Project)),
            instances: Arc::new(KubeCache::new(client.clone(), ResourceKind::Instance)),
            databases: Arc::new(KubeCache::new(client.clone(), ResourceKind::Database)),
        }
    }
}

/// Register one unit per kind with a new supervisor
pub fn build_supervisor<P, I, D>(
    caches: Caches<P, I, D>,
    providers: Arc<dyn ProviderFactory>,
    events: Arc<dyn EventPublisher>,
    policies: AbsencePolicies,
    config: SupervisorConfig,
) -> Result<Supervisor, SupervisorError>
where
    P: CacheDriver<Project> + 'static,
    I: CacheDriver<Instance> + 'static,
    D: CacheDriver<Database> + 'static,
{
    let ctx = Arc::new(
        Context::new(caches.projects.clone(), providers, events).with_policies(policies),
    );

    let mut supervisor = Supervisor::new(config);

    info!("- Project controller");
    supervisor.register(Arc::new(ReconcileUnit::new(
        ResourceKind::Project,
        caches.projects,
        ProjectReconciler,
    )))?;

    info!("- Instance controller");
    supervisor.register(Arc::new(ReconcileUnit::new(
        ResourceKind::Instance,
        caches.instances,
        InstanceReconciler::new(ctx.clone()),
    )))?;

    info!("- Database controller");
    supervisor.register(Arc::new(ReconcileUnit::new(
        ResourceKind::Database,
        caches.databases,
        DatabaseReconciler::new(ctx),
    )))?;

    Ok(supervisor)
}

/// Production supervisor: watch caches, Google providers authenticated from
/// Project secrets, and Kubernetes Events
pub fn build_operator(
    client: Client,
    http: reqwest::Client,
    policies: AbsencePolicies,
    config: SupervisorConfig,
) -> Result<Supervisor, SupervisorError> {
    let credentials = Arc::new(SecretCredentialResolver::new(
        Arc::new(KubeSecretReader::new(client.clone())),
        http.clone(),
    ));
    let providers = Arc::new(GoogleProviderFactory::new(credentials, http));
    let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));

    build_supervisor(
        Caches::watching(&client),
        providers,
        events,
        policies,
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use cloudcrd_common::crd::{DatabaseSpec, InstanceSpec};
    use cloudcrd_common::events::{reasons, RecordingEventPublisher};
    use cloudcrd_common::ReconcileError;
    use cloudcrd_controller::{ComputeApi, SqlAdminApi};
    use cloudcrd_runtime::MemoryCache;
    use kube::Resource;
    use tokio_util::sync::CancellationToken;

    /// Provider factory that must never be reached
    struct Unreachable;

    #[async_trait]
    impl ProviderFactory for Unreachable {
        async fn compute(&self, _project: &Project) -> Result<Arc<dyn ComputeApi>, ReconcileError> {
            Err(ReconcileError::internal("test", "compute requested"))
        }

        async fn sql_admin(
            &self,
            _project: &Project,
        ) -> Result<Arc<dyn SqlAdminApi>, ReconcileError> {
            Err(ReconcileError::internal("test", "sql admin requested"))
        }
    }

    fn namespaced<K: Resource>(mut obj: K) -> K {
        obj.meta_mut().namespace = Some("ns".to_string());
        obj
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            workers_per_kind: 1,
            cache_sync_timeout: Duration::from_secs(5),
            sync_poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn every_kind_is_registered() {
        let supervisor = build_supervisor(
            Caches {
                projects: Arc::new(MemoryCache::<Project>::new()),
                instances: Arc::new(MemoryCache::<Instance>::new()),
                databases: Arc::new(MemoryCache::<Database>::new()),
            },
            Arc::new(Unreachable),
            Arc::new(RecordingEventPublisher::new()),
            AbsencePolicies::default(),
            config(),
        )
        .unwrap();

        assert_eq!(supervisor.kinds(), ResourceKind::ALL.to_vec());
    }

    /// Story: an Instance and a Database both point at a Project that does
    /// not exist. Once the operator is running each of them gets a
    /// ProjectMissing warning, and no provider is ever asked for a client.
    #[tokio::test]
    async fn story_objects_without_project_are_reported() {
        let events = Arc::new(RecordingEventPublisher::new());
        let supervisor = build_supervisor(
            Caches {
                projects: Arc::new(MemoryCache::with_objects(Vec::<Project>::new())),
                instances: Arc::new(MemoryCache::with_objects([namespaced(Instance::new(
                    "web-1",
                    InstanceSpec {
                        project: String::new(),
                        machine_type: "n1-standard-1".to_string(),
                        image: "debian-10".to_string(),
                        disk_size: 20,
                    },
                ))])),
                databases: Arc::new(MemoryCache::with_objects([namespaced(Database::new(
                    "db-1",
                    DatabaseSpec {
                        project: "p1".to_string(),
                        ..Default::default()
                    },
                ))])),
            },
            Arc::new(Unreachable),
            events.clone(),
            AbsencePolicies::default(),
            config(),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(supervisor.run(shutdown.clone()));

        let reported = || {
            let mut objects: Vec<_> = events
                .events()
                .into_iter()
                .filter(|e| e.warning && e.reason == reasons::PROJECT_MISSING)
                .map(|e| format!("{}:{}", e.kind, e.object))
                .collect();
            objects.sort();
            objects.dedup();
            objects
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while reported().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        running.await.unwrap().unwrap();

        let reported = reported();
        assert_eq!(reported, vec!["Database:ns/db-1", "Instance:ns/web-1"]);
    }
}
