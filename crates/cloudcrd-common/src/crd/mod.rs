//! Custom Resource Definitions for cloudcrd
//!
//! Three namespaced kinds in the `google.cloudcrd.weisnix.org/v1` group:
//! `Project` (credentials and location), `Instance` (a Compute Engine VM)
//! and `Database` (a Cloud SQL instance).

mod database;
mod instance;
mod project;

use std::fmt;

pub use database::{Database, DatabaseSpec};
pub use instance::{Instance, InstanceSpec};
pub use project::{Project, ProjectSpec};

use crate::DEFAULT_PROJECT;

/// Resource kinds reconciled by the controller.
///
/// Each kind gets its own cache, queue and worker pool; kinds never share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Google Cloud project
    Project,
    /// Compute Engine instance
    Instance,
    /// Cloud SQL database instance
    Database,
}

impl ResourceKind {
    /// Every kind, in startup order
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Project,
        ResourceKind::Instance,
        ResourceKind::Database,
    ];

    /// Kind name as it appears in the CRD
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "Project",
            ResourceKind::Instance => "Instance",
            ResourceKind::Database => "Database",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a `spec.project` reference, falling back to [`DEFAULT_PROJECT`]
pub(crate) fn project_or_default(project: &str) -> &str {
    if project.is_empty() {
        DEFAULT_PROJECT
    } else {
        project
    }
}
