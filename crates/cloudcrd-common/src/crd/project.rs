//! Project CRD: a Google Cloud project and the credentials used to manage it

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Project binds a GCP project id, its location and a service account.
///
/// Instances and Databases in the same namespace reference a Project by name;
/// every provider call made for them authenticates with this Project's
/// service-account key.
///
/// Example:
/// ```yaml
/// apiVersion: google.cloudcrd.weisnix.org/v1
/// kind: Project
/// metadata:
///   name: default
/// spec:
///   name: my-gcp-project
///   region: europe-west1
///   zone: europe-west1-b
///   serviceaccount: provisioner@my-gcp-project.iam.gserviceaccount.com
///   serviceaccountsecret: provisioner-key
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "google.cloudcrd.weisnix.org",
    version = "v1",
    kind = "Project",
    namespaced,
    printcolumn = r#"{"name":"GCP Project","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Zone","type":"string","jsonPath":".spec.zone"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ProjectSpec {
    /// GCP project id
    pub name: String,

    /// Region used for subnetworks (e.g. `europe-west1`)
    #[serde(default)]
    pub region: String,

    /// Zone instances are placed in (e.g. `europe-west1-b`)
    #[serde(default)]
    pub zone: String,

    /// Service account email attached to created instances
    #[serde(rename = "serviceaccount", default)]
    pub service_account: String,

    /// Name of the Secret (same namespace) holding the service-account key
    /// JSON under the `json` data key
    #[serde(rename = "serviceaccountsecret", default)]
    pub service_account_secret: String,
}
