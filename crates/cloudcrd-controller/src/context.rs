//! Shared state of the Instance and Database reconcilers

use std::sync::Arc;

use cloudcrd_common::crd::Project;
use cloudcrd_common::events::{actions, reasons, EventPublisher};
use cloudcrd_common::ReconcileError;
use cloudcrd_gcp::ProviderError;
use cloudcrd_runtime::{ObjectCache, ObjectKey};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::error;

use crate::policy::AbsencePolicies;
use crate::provider::ProviderFactory;

/// Result of one successful create or delete attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The external resource already exists; nothing was changed
    Present,
    /// A create or delete request was accepted by the provider
    Requested,
    /// A delete found nothing to remove
    AlreadyAbsent,
}

/// Dependencies of the provider-backed reconcilers
pub struct Context {
    /// Project cache, read to resolve `spec.project` references
    pub projects: Arc<dyn ObjectCache<Project>>,
    /// Builds authenticated provider handles per Project
    pub providers: Arc<dyn ProviderFactory>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Which lookup failures mean "does not exist"
    pub policies: AbsencePolicies,
}

impl Context {
    /// Context with the default absence policies
    pub fn new(
        projects: Arc<dyn ObjectCache<Project>>,
        providers: Arc<dyn ProviderFactory>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            projects,
            providers,
            events,
            policies: AbsencePolicies::default(),
        }
    }

    /// Override the absence policies
    pub fn with_policies(mut self, policies: AbsencePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Look up the Project `project_ref` in the namespace of `obj`
    pub fn project_for<K: Resource>(
        &self,
        obj: &K,
        project_ref: &str,
    ) -> Result<Arc<Project>, ReconcileError> {
        let namespace = obj.namespace().unwrap_or_default();
        let key = ObjectKey::new(namespace.clone(), project_ref);
        self.projects
            .get(&key)
            .ok_or_else(|| ReconcileError::project_not_found(namespace, project_ref))
    }

    /// Emit the event and log line for the outcome of a create or delete,
    /// then hand the result back to the worker.
    pub async fn report<K>(
        &self,
        obj: &K,
        action: &str,
        result: Result<Outcome, ReconcileError>,
    ) -> Result<(), ReconcileError>
    where
        K: Resource<DynamicType = ()>,
    {
        let object_ref = obj.object_ref(&());
        let deleting = action == actions::DELETE;

        match &result {
            Ok(Outcome::Present) => {}
            Ok(Outcome::Requested) => {
                let reason = if deleting {
                    reasons::DELETION_REQUESTED
                } else {
                    reasons::PROVISIONING_REQUESTED
                };
                self.publish(&object_ref, EventType::Normal, reason, action, None)
                    .await;
            }
            Ok(Outcome::AlreadyAbsent) => {
                self.publish(
                    &object_ref,
                    EventType::Normal,
                    reasons::ALREADY_ABSENT,
                    action,
                    Some("external resource did not exist".to_string()),
                )
                .await;
            }
            Err(e) => {
                error!(
                    kind = %K::kind(&()),
                    name = %obj.name_any(),
                    namespace = %obj.namespace().unwrap_or_default(),
                    action,
                    error = %e,
                    "reconcile failed"
                );
                let reason = match (&e, deleting) {
                    (ReconcileError::ProjectNotFound { .. }, _) => reasons::PROJECT_MISSING,
                    (ReconcileError::Credentials { .. }, _) => reasons::CREDENTIALS_INVALID,
                    (_, true) => reasons::DELETION_FAILED,
                    (_, false) => reasons::PROVISIONING_FAILED,
                };
                self.publish(
                    &object_ref,
                    EventType::Warning,
                    reason,
                    action,
                    Some(e.to_string()),
                )
                .await;
            }
        }
        result.map(|_| ())
    }

    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .publish(object_ref, type_, reason, action, note)
            .await;
    }
}

/// Translate a provider failure for a resource of `project_key`
pub fn provider_error(project_key: &str, err: ProviderError) -> ReconcileError {
    match err {
        ProviderError::Credentials(e) => ReconcileError::credentials(project_key, e.to_string()),
        ProviderError::Api {
            action,
            resource,
            status,
            message,
            ..
        } => ReconcileError::provider(action, resource, format!("HTTP {}: {}", status, message)),
        ProviderError::Transport {
            action,
            resource,
            message,
        } => ReconcileError::provider(action, resource, message),
    }
}

/// `namespace/name` of a Project, as used in error messages
pub fn project_key(project: &Project) -> String {
    format!(
        "{}/{}",
        project.namespace().unwrap_or_default(),
        project.name_any()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcrd_common::crd::{Instance, InstanceSpec, ProjectSpec};
    use cloudcrd_common::events::RecordingEventPublisher;
    use cloudcrd_gcp::CredentialError;
    use cloudcrd_runtime::MemoryCache;

    use crate::provider::MockProviderFactory;

    fn in_namespace<K: Resource>(mut obj: K, namespace: &str) -> K {
        obj.meta_mut().namespace = Some(namespace.to_string());
        obj
    }

    fn context(projects: Vec<Project>) -> (Context, Arc<RecordingEventPublisher>) {
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = Context::new(
            Arc::new(MemoryCache::with_objects(projects)),
            Arc::new(MockProviderFactory::new()),
            events.clone(),
        );
        (ctx, events)
    }

    fn instance() -> Instance {
        in_namespace(Instance::new("web-1", InstanceSpec::default()), "ns")
    }

    #[test]
    fn projects_resolve_in_the_object_namespace() {
        let project = in_namespace(Project::new("p1", ProjectSpec::default()), "ns");
        let elsewhere = in_namespace(Project::new("p2", ProjectSpec::default()), "other");
        let (ctx, _) = context(vec![project, elsewhere]);

        assert!(ctx.project_for(&instance(), "p1").is_ok());
        let err = ctx.project_for(&instance(), "p2").unwrap_err();
        assert_eq!(err.to_string(), "project 'ns/p2' not found");
    }

    #[tokio::test]
    async fn requested_create_is_a_normal_event() {
        let (ctx, events) = context(vec![]);
        ctx.report(&instance(), actions::CREATE, Ok(Outcome::Requested))
            .await
            .unwrap();

        let recorded = events.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].reason, reasons::PROVISIONING_REQUESTED);
        assert_eq!(recorded[0].object, "ns/web-1");
        assert_eq!(recorded[0].kind, "Instance");
        assert!(!recorded[0].warning);
    }

    #[tokio::test]
    async fn existing_resource_emits_nothing() {
        let (ctx, events) = context(vec![]);
        ctx.report(&instance(), actions::CREATE, Ok(Outcome::Present))
            .await
            .unwrap();
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn failures_are_warnings_and_returned() {
        let (ctx, events) = context(vec![]);
        let err = ctx
            .report(
                &instance(),
                actions::DELETE,
                Err(ReconcileError::provider("delete instance", "web-1", "HTTP 500: boom")),
            )
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        let recorded = events.events();
        assert_eq!(recorded[0].reason, reasons::DELETION_FAILED);
        assert!(recorded[0].warning);
        assert!(recorded[0].note.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn configuration_failures_are_reported_as_project_missing() {
        let (ctx, events) = context(vec![]);
        let _ = ctx
            .report(
                &instance(),
                actions::CREATE,
                Err(ReconcileError::project_not_found("ns", "default")),
            )
            .await;
        assert_eq!(events.events()[0].reason, reasons::PROJECT_MISSING);
    }

    #[tokio::test]
    async fn credential_failures_are_reported_as_credentials_invalid() {
        let (ctx, events) = context(vec![]);
        let _ = ctx
            .report(
                &instance(),
                actions::DELETE,
                Err(provider_error(
                    "ns/p1",
                    ProviderError::Credentials(CredentialError::MalformedKey(
                        "client_email is empty".to_string(),
                    )),
                )),
            )
            .await;

        let recorded = events.events();
        assert_eq!(recorded[0].reason, reasons::CREDENTIALS_INVALID);
        assert!(recorded[0].warning);
        assert!(recorded[0].note.as_deref().unwrap().contains("client_email"));
    }

    #[test]
    fn provider_errors_keep_action_and_status() {
        let err = provider_error(
            "ns/p1",
            ProviderError::api("insert instance", "web-1", 409, "already exists"),
        );
        assert_eq!(
            err.to_string(),
            "provider error during insert instance of 'web-1': HTTP 409: already exists"
        );
    }

    #[test]
    fn token_failures_become_credentials_errors() {
        let err = provider_error(
            "ns/p1",
            ProviderError::Credentials(CredentialError::TokenExchange("invalid_grant".to_string())),
        );
        assert!(matches!(err, ReconcileError::Credentials { .. }));
        assert!(err.to_string().contains("ns/p1"));
    }
}
