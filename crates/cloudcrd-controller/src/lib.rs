//! Reconcilers for the cloudcrd kinds
//!
//! - [`ProjectReconciler`]: observes Projects, no external side effects
//! - [`InstanceReconciler`]: creates and deletes Compute Engine VMs
//! - [`DatabaseReconciler`]: creates and deletes Cloud SQL instances
//!
//! Instance and Database share a [`Context`]: the Project cache, a
//! [`ProviderFactory`] that authenticates with the Project's service account
//! through a [`CredentialResolver`], the event sink and the
//! [`AbsencePolicies`].

pub mod context;
pub mod credentials;
pub mod database;
pub mod instance;
pub mod policy;
pub mod project;
pub mod provider;

pub use context::{Context, Outcome};
pub use credentials::{CredentialResolver, KubeSecretReader, SecretCredentialResolver, SecretReader};
pub use database::DatabaseReconciler;
pub use instance::InstanceReconciler;
pub use policy::{AbsencePolicies, AbsencePolicy};
pub use project::ProjectReconciler;
pub use provider::{ComputeApi, Endpoints, GoogleProviderFactory, ProviderFactory, SqlAdminApi};
