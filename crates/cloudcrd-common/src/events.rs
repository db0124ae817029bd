//! Kubernetes Event recording for cloudcrd controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so reconcilers can attach provisioning outcomes to the object they
//! concern, visible via `kubectl describe`.
//!
//! Events are **best-effort**: failures are logged as warnings and never
//! propagate errors. A failed event must never fail a reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "ProvisioningRequested")
    /// * `action` - What action was taken (e.g. "Create")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// `namespace/name` of the involved object
    pub object: String,
    /// Kind of the involved object
    pub kind: String,
    /// Whether this was a Warning event
    pub warning: bool,
    /// Reason string
    pub reason: String,
    /// Action string
    pub action: String,
    /// Human-readable note
    pub note: Option<String>,
}

/// In-memory publisher that keeps every event, for tests and dry runs.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Number of Warning events recorded
    pub fn warnings(&self) -> usize {
        self.events.lock().iter().filter(|e| e.warning).count()
    }

    /// Number of Normal events recorded
    pub fn normals(&self) -> usize {
        self.events.lock().iter().filter(|e| !e.warning).count()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object = format!(
            "{}/{}",
            resource_ref.namespace.as_deref().unwrap_or_default(),
            resource_ref.name.as_deref().unwrap_or_default()
        );
        self.events.lock().push(RecordedEvent {
            object,
            kind: resource_ref.kind.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Create request accepted by the provider
    pub const PROVISIONING_REQUESTED: &str = "ProvisioningRequested";
    /// Create request rejected or could not be issued
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
    /// Delete request accepted by the provider
    pub const DELETION_REQUESTED: &str = "DeletionRequested";
    /// Delete request rejected or could not be issued
    pub const DELETION_FAILED: &str = "DeletionFailed";
    /// Delete found nothing to remove
    pub const ALREADY_ABSENT: &str = "AlreadyAbsent";
    /// Referenced Project does not exist
    pub const PROJECT_MISSING: &str = "ProjectMissing";
    /// Project's service-account credentials are missing or rejected
    pub const CREDENTIALS_INVALID: &str = "CredentialsInvalid";
}

/// Well-known event action strings.
pub mod actions {
    /// Creating the external resource
    pub const CREATE: &str = "Create";
    /// Deleting the external resource
    pub const DELETE: &str = "Delete";
}
