//! Instance reconciler: Compute Engine VMs

use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::crd::{Instance, InstanceSpec, ProjectSpec};
use cloudcrd_common::events::actions;
use cloudcrd_common::ReconcileError;
use cloudcrd_gcp::auth::{COMPUTE_SCOPE, DEVSTORAGE_FULL_CONTROL_SCOPE};
use cloudcrd_gcp::types::{
    AccessConfig, AttachedDisk, AttachedDiskInitializeParams, ComputeInstance, NetworkInterface,
    ServiceAccount,
};
use cloudcrd_gcp::ErrorClass;
use cloudcrd_runtime::Reconciler;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::context::{project_key, provider_error, Context, Outcome};

/// Reconciler for [`Instance`]
pub struct InstanceReconciler {
    ctx: Arc<Context>,
}

impl InstanceReconciler {
    /// Reconciler using `ctx`
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn ensure(&self, instance: &Instance) -> Result<Outcome, ReconcileError> {
        let name = instance.name_any();
        validate(&instance.spec)?;

        let project = self.ctx.project_for(instance, instance.spec.project_ref())?;
        let project_key = project_key(&project);
        let zone = project.spec.zone.as_str();
        let compute = self.ctx.providers.compute(&project).await?;

        match compute.get_instance(zone, &name).await {
            Ok(existing) => {
                debug!(
                    instance = %name,
                    status = existing.status.as_deref().unwrap_or_default(),
                    "instance exists"
                );
                return Ok(Outcome::Present);
            }
            Err(e) if self.ctx.policies.instance.is_absent(&e, &name) => {}
            Err(e) => return Err(provider_error(&project_key, e)),
        }

        let body = build_instance(&name, &instance.spec, &project.spec);
        let op = compute
            .insert_instance(zone, &body)
            .await
            .map_err(|e| provider_error(&project_key, e))?;

        info!(
            instance = %name,
            gcp_project = %project.spec.name,
            zone,
            operation = %op.name,
            "instance provisioning requested"
        );
        Ok(Outcome::Requested)
    }

    async fn remove(&self, instance: &Instance) -> Result<Outcome, ReconcileError> {
        let name = instance.name_any();
        let project = self.ctx.project_for(instance, instance.spec.project_ref())?;
        let project_key = project_key(&project);
        let compute = self.ctx.providers.compute(&project).await?;

        match compute.delete_instance(&project.spec.zone, &name).await {
            Ok(op) => {
                info!(instance = %name, operation = %op.name, "instance deletion requested");
                Ok(Outcome::Requested)
            }
            Err(e) if e.class() == ErrorClass::NotFound => {
                info!(instance = %name, "instance already absent");
                Ok(Outcome::AlreadyAbsent)
            }
            Err(e) => Err(provider_error(&project_key, e)),
        }
    }
}

#[async_trait]
impl Reconciler<Instance> for InstanceReconciler {
    async fn create_or_update(&self, instance: Arc<Instance>) -> Result<(), ReconcileError> {
        let result = self.ensure(&instance).await;
        self.ctx.report(instance.as_ref(), actions::CREATE, result).await
    }

    async fn delete(&self, instance: Arc<Instance>) -> Result<(), ReconcileError> {
        let result = self.remove(&instance).await;
        self.ctx.report(instance.as_ref(), actions::DELETE, result).await
    }
}

/// Reject specs that can never be provisioned
pub fn validate(spec: &InstanceSpec) -> Result<(), ReconcileError> {
    if spec.machine_type.is_empty() {
        return Err(ReconcileError::Validation("spec.type is required".to_string()));
    }
    if spec.image.is_empty() {
        return Err(ReconcileError::Validation("spec.image is required".to_string()));
    }
    if spec.disk_size <= 0 {
        return Err(ReconcileError::Validation(format!(
            "spec.disksize must be positive, got {}",
            spec.disk_size
        )));
    }
    Ok(())
}

/// Request body for creating the VM `name` in `project`
pub fn build_instance(name: &str, spec: &InstanceSpec, project: &ProjectSpec) -> ComputeInstance {
    ComputeInstance {
        name: name.to_string(),
        min_cpu_platform: "Automatic".to_string(),
        machine_type: format!(
            "projects/{}/zones/{}/machineTypes/{}",
            project.name, project.zone, spec.machine_type
        ),
        status: None,
        disks: vec![AttachedDisk {
            auto_delete: true,
            boot: true,
            disk_type: "PERSISTENT".to_string(),
            initialize_params: Some(AttachedDiskInitializeParams {
                source_image: spec.image.clone(),
                disk_size_gb: Some(spec.disk_size),
            }),
        }],
        network_interfaces: vec![NetworkInterface {
            subnetwork: format!(
                "projects/{}/regions/{}/subnetworks/default",
                project.name, project.region
            ),
            access_configs: vec![AccessConfig {
                access_type: "ONE_TO_ONE_NAT".to_string(),
                name: "External NAT".to_string(),
                nat_ip: None,
            }],
        }],
        service_accounts: vec![ServiceAccount {
            email: project.service_account.clone(),
            scopes: vec![
                DEVSTORAGE_FULL_CONTROL_SCOPE.to_string(),
                COMPUTE_SCOPE.to_string(),
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcrd_common::crd::Project;
    use cloudcrd_common::events::{reasons, RecordingEventPublisher};
    use cloudcrd_gcp::types::Operation;
    use cloudcrd_gcp::ProviderError;
    use cloudcrd_runtime::MemoryCache;
    use kube::Resource;
    use parking_lot::Mutex;

    use crate::policy::{AbsencePolicies, AbsencePolicy};
    use crate::provider::{ComputeApi, MockComputeApi, MockProviderFactory};

    fn web_1() -> Arc<Instance> {
        let mut instance = Instance::new(
            "web-1",
            InstanceSpec {
                project: String::new(),
                machine_type: "n1-standard-1".to_string(),
                image: "debian-10".to_string(),
                disk_size: 20,
            },
        );
        instance.meta_mut().namespace = Some("ns".to_string());
        Arc::new(instance)
    }

    fn default_project() -> Project {
        let mut project = Project::new(
            "default",
            ProjectSpec {
                name: "p1".to_string(),
                region: "europe-west1".to_string(),
                zone: "europe-west1-b".to_string(),
                service_account: "vm@p1.iam.gserviceaccount.com".to_string(),
                service_account_secret: "sa-key".to_string(),
            },
        );
        project.meta_mut().namespace = Some("ns".to_string());
        project
    }

    fn operation(name: &str) -> Operation {
        Operation {
            name: name.to_string(),
            ..Default::default()
        }
    }

    struct Harness {
        reconciler: InstanceReconciler,
        events: Arc<RecordingEventPublisher>,
    }

    fn harness(
        projects: Vec<Project>,
        factory: MockProviderFactory,
        policies: AbsencePolicies,
    ) -> Harness {
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = Context::new(
            Arc::new(MemoryCache::with_objects(projects)),
            Arc::new(factory),
            events.clone(),
        )
        .with_policies(policies);
        Harness {
            reconciler: InstanceReconciler::new(Arc::new(ctx)),
            events,
        }
    }

    fn factory_for(compute: MockComputeApi) -> MockProviderFactory {
        let compute: Arc<dyn ComputeApi> = Arc::new(compute);
        let mut factory = MockProviderFactory::new();
        factory
            .expect_compute()
            .returning(move |_| Ok(compute.clone()));
        factory
    }

    /// Story: an Instance references the implicit `default` Project, which
    /// does not exist yet. Nothing is sent to the provider, the user sees a
    /// warning, and the error is retryable so the Instance is provisioned
    /// once the Project shows up.
    #[tokio::test]
    async fn story_missing_project_fails_before_any_provider_call() {
        let mut factory = MockProviderFactory::new();
        factory.expect_compute().never();
        let h = harness(vec![], factory, AbsencePolicies::default());

        let err = h.reconciler.create_or_update(web_1()).await.unwrap_err();

        assert!(matches!(err, ReconcileError::ProjectNotFound { .. }));
        assert_eq!(err.to_string(), "project 'ns/default' not found");
        assert!(err.is_retryable());
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].reason, reasons::PROJECT_MISSING);
    }

    #[tokio::test]
    async fn absent_instance_is_created_once_with_declared_fields() {
        let inserted = Arc::new(Mutex::new(Vec::new()));
        let captured = inserted.clone();
        let mut compute = MockComputeApi::new();
        compute
            .expect_get_instance()
            .times(1)
            .returning(|_, name| Err(ProviderError::api("get instance", name, 404, "not found")));
        compute
            .expect_insert_instance()
            .times(1)
            .returning(move |zone, body| {
                captured.lock().push((zone.to_string(), body.clone()));
                Ok(operation("operation-1"))
            });
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        h.reconciler.create_or_update(web_1()).await.unwrap();

        let inserted = inserted.lock();
        let (zone, body) = &inserted[0];
        assert_eq!(zone, "europe-west1-b");
        assert_eq!(body.name, "web-1");
        assert_eq!(
            body.machine_type,
            "projects/p1/zones/europe-west1-b/machineTypes/n1-standard-1"
        );
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].warning);
        assert_eq!(events[0].reason, reasons::PROVISIONING_REQUESTED);
    }

    #[tokio::test]
    async fn existing_instance_is_left_alone() {
        let mut compute = MockComputeApi::new();
        compute.expect_get_instance().returning(|_, name| {
            Ok(ComputeInstance {
                name: name.to_string(),
                status: Some("RUNNING".to_string()),
                ..Default::default()
            })
        });
        compute.expect_insert_instance().never();
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        h.reconciler.create_or_update(web_1()).await.unwrap();
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn forbidden_lookup_is_an_error_under_the_strict_policy() {
        let mut compute = MockComputeApi::new();
        compute
            .expect_get_instance()
            .returning(|_, name| Err(ProviderError::api("get instance", name, 403, "denied")));
        compute.expect_insert_instance().never();
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        let err = h.reconciler.create_or_update(web_1()).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 403"));
        assert_eq!(h.events.events()[0].reason, reasons::PROVISIONING_FAILED);
    }

    #[tokio::test]
    async fn forbidden_lookup_creates_when_policy_allows() {
        let mut compute = MockComputeApi::new();
        compute
            .expect_get_instance()
            .returning(|_, name| Err(ProviderError::api("get instance", name, 403, "denied")));
        compute
            .expect_insert_instance()
            .times(1)
            .returning(|_, _| Ok(operation("operation-1")));
        let policies = AbsencePolicies {
            instance: AbsencePolicy::FORBIDDEN_IS_ABSENT,
            ..AbsencePolicies::default()
        };
        let h = harness(vec![default_project()], factory_for(compute), policies);

        h.reconciler.create_or_update(web_1()).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_insert_is_a_retryable_warning() {
        let mut compute = MockComputeApi::new();
        compute
            .expect_get_instance()
            .returning(|_, name| Err(ProviderError::api("get instance", name, 404, "")));
        compute.expect_insert_instance().returning(|_, body| {
            Err(ProviderError::api("insert instance", body.name.clone(), 429, "quota exceeded"))
        });
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        let err = h.reconciler.create_or_update(web_1()).await.unwrap_err();
        assert!(err.is_retryable());
        let events = h.events.events();
        assert!(events[0].warning);
        assert_eq!(events[0].reason, reasons::PROVISIONING_FAILED);
        assert!(events[0].note.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn invalid_spec_is_not_retried() {
        let factory = MockProviderFactory::new();
        let h = harness(vec![default_project()], factory, AbsencePolicies::default());
        let mut instance = (*web_1()).clone();
        instance.spec.disk_size = 0;

        let err = h
            .reconciler
            .create_or_update(Arc::new(instance))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(h.events.events()[0].warning);
    }

    /// Story: the delete for `ns/web-1` arrives but its Project is gone.
    /// The delete call is never made, the user sees a warning and the key
    /// is retried.
    #[tokio::test]
    async fn story_delete_without_project_fails_before_delete_call() {
        let mut factory = MockProviderFactory::new();
        factory.expect_compute().never();
        let h = harness(vec![], factory, AbsencePolicies::default());

        let err = h.reconciler.delete(web_1()).await.unwrap_err();

        assert!(err.is_retryable());
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].action, actions::DELETE);
    }

    #[tokio::test]
    async fn delete_is_requested_in_the_project_zone() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let captured = deleted.clone();
        let mut compute = MockComputeApi::new();
        compute
            .expect_delete_instance()
            .times(1)
            .returning(move |zone, name| {
                captured.lock().push(format!("{}/{}", zone, name));
                Ok(operation("operation-2"))
            });
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        h.reconciler.delete(web_1()).await.unwrap();
        assert_eq!(*deleted.lock(), vec!["europe-west1-b/web-1".to_string()]);
        assert_eq!(h.events.events()[0].reason, reasons::DELETION_REQUESTED);
    }

    #[tokio::test]
    async fn deleting_a_missing_instance_succeeds() {
        let mut compute = MockComputeApi::new();
        compute
            .expect_delete_instance()
            .returning(|_, name| Err(ProviderError::api("delete instance", name, 404, "")));
        let h = harness(
            vec![default_project()],
            factory_for(compute),
            AbsencePolicies::default(),
        );

        h.reconciler.delete(web_1()).await.unwrap();
        let events = h.events.events();
        assert!(!events[0].warning);
        assert_eq!(events[0].reason, reasons::ALREADY_ABSENT);
    }

    #[test]
    fn instance_body_matches_provisioning_layout() {
        let body = build_instance("web-1", &web_1().spec, &default_project().spec);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "name": "web-1",
                "minCpuPlatform": "Automatic",
                "machineType": "projects/p1/zones/europe-west1-b/machineTypes/n1-standard-1",
                "disks": [{
                    "autoDelete": true,
                    "boot": true,
                    "type": "PERSISTENT",
                    "initializeParams": {
                        "sourceImage": "debian-10",
                        "diskSizeGb": "20"
                    }
                }],
                "networkInterfaces": [{
                    "subnetwork": "projects/p1/regions/europe-west1/subnetworks/default",
                    "accessConfigs": [{"type": "ONE_TO_ONE_NAT", "name": "External NAT"}]
                }],
                "serviceAccounts": [{
                    "email": "vm@p1.iam.gserviceaccount.com",
                    "scopes": [
                        "https://www.googleapis.com/auth/devstorage.full_control",
                        "https://www.googleapis.com/auth/compute"
                    ]
                }]
            })
        );
    }

    #[test]
    fn validation_requires_type_image_and_disk() {
        let valid = web_1().spec.clone();
        assert!(validate(&valid).is_ok());

        let mut no_type = valid.clone();
        no_type.machine_type.clear();
        assert!(validate(&no_type).unwrap_err().to_string().contains("spec.type"));

        let mut no_image = valid.clone();
        no_image.image.clear();
        assert!(validate(&no_image).unwrap_err().to_string().contains("spec.image"));

        let mut negative = valid;
        negative.disk_size = -1;
        assert!(validate(&negative).unwrap_err().to_string().contains("disksize"));
    }
}
