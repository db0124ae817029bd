//! Instance CRD: a Compute Engine virtual machine

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::project_or_default;

/// Instance declares a Compute Engine VM in the referenced Project's zone.
///
/// The controller creates the VM when it does not exist. Changes made to the
/// spec after creation are not applied to the running VM.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "google.cloudcrd.weisnix.org",
    version = "v1",
    kind = "Instance",
    namespaced,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.project"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct InstanceSpec {
    /// Name of the Project resource; empty means `default`
    #[serde(default)]
    pub project: String,

    /// Machine type (e.g. `n1-standard-1`)
    #[serde(rename = "type")]
    pub machine_type: String,

    /// Source image for the boot disk
    pub image: String,

    /// Boot disk size in GB
    #[serde(rename = "disksize", default)]
    pub disk_size: i64,
}

impl InstanceSpec {
    /// Name of the referenced Project, defaulted
    pub fn project_ref(&self) -> &str {
        project_or_default(&self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declared_manifest_fields() {
        let spec: InstanceSpec = serde_json::from_value(serde_json::json!({
            "type": "n1-standard-1",
            "image": "debian-10",
            "disksize": 20
        }))
        .unwrap();

        assert_eq!(spec.machine_type, "n1-standard-1");
        assert_eq!(spec.disk_size, 20);
        assert_eq!(spec.project_ref(), "default");
    }
}
