//! CustomResourceDefinition manifests

use cloudcrd_common::crd::{Database, Instance, Project};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD served by the operator, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![Project::crd(), Instance::crd(), Database::crd()]
}

/// All CRDs as one multi-document YAML stream
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for crd in all_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
