//! Project reconciler
//!
//! Projects have no external side effects of their own. They go through the
//! same cache and queue as the other kinds so Instances and Databases can
//! resolve them, and so a change to a Project is observed like any other.

use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::crd::Project;
use cloudcrd_common::ReconcileError;
use cloudcrd_runtime::Reconciler;
use kube::ResourceExt;
use tracing::debug;

/// Reconciler for [`Project`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectReconciler;

#[async_trait]
impl Reconciler<Project> for ProjectReconciler {
    async fn create_or_update(&self, project: Arc<Project>) -> Result<(), ReconcileError> {
        debug!(
            project = %project.name_any(),
            namespace = %project.namespace().unwrap_or_default(),
            gcp_project = %project.spec.name,
            zone = %project.spec.zone,
            "project observed"
        );
        Ok(())
    }

    async fn delete(&self, project: Arc<Project>) -> Result<(), ReconcileError> {
        debug!(
            project = %project.name_any(),
            namespace = %project.namespace().unwrap_or_default(),
            "project removed"
        );
        Ok(())
    }
}
