//! Database CRD: a Cloud SQL instance

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::project_or_default;

/// Database declares a Cloud SQL (MySQL) instance in the referenced Project.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "google.cloudcrd.weisnix.org",
    version = "v1",
    kind = "Database",
    namespaced,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.project"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct DatabaseSpec {
    /// Name of the Project resource; empty means `default`
    #[serde(default)]
    pub project: String,

    /// Machine tier (e.g. `db-n1-standard-1`); empty selects the default tier
    #[serde(rename = "type", default)]
    pub tier: String,

    /// Extra CIDRs allowed to connect, in addition to the project's instances
    #[serde(rename = "authorizednetworks", default)]
    pub authorized_networks: Vec<String>,
}

impl DatabaseSpec {
    /// Name of the referenced Project, defaulted
    pub fn project_ref(&self) -> &str {
        project_or_default(&self.project)
    }
}
