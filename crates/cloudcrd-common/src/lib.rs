//! Common types for cloudcrd: CRDs, errors, events and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod telemetry;

pub use crd::ResourceKind;
pub use error::ReconcileError;

/// Project name used when an Instance or Database leaves `spec.project` empty
pub const DEFAULT_PROJECT: &str = "default";

/// Data key inside the service-account Secret that holds the key JSON
pub const SERVICE_ACCOUNT_SECRET_KEY: &str = "json";

/// Reporting component name on emitted Kubernetes Events
pub const CONTROLLER_NAME: &str = "cloudcrd-controller";
