//! Provider capabilities used by the reconcilers
//!
//! The reconcilers talk to Google through these traits so tests can swap in
//! mocks. The production implementations delegate to the REST clients in
//! `cloudcrd-gcp`.

use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::crd::Project;
use cloudcrd_common::ReconcileError;
use cloudcrd_gcp::auth::{COMPUTE_SCOPE, SQL_ADMIN_SCOPE};
use cloudcrd_gcp::types::{ComputeInstance, DatabaseInstance, Operation};
use cloudcrd_gcp::{ComputeClient, ProviderError, SqlAdminClient};

#[cfg(test)]
use mockall::automock;

use crate::credentials::CredentialResolver;

/// Compute Engine operations on one project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Look up an instance
    async fn get_instance(&self, zone: &str, name: &str) -> Result<ComputeInstance, ProviderError>;

    /// Request creation of an instance
    async fn insert_instance(
        &self,
        zone: &str,
        instance: &ComputeInstance,
    ) -> Result<Operation, ProviderError>;

    /// Request deletion of an instance
    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation, ProviderError>;

    /// List every instance in a zone
    async fn list_instances(&self, zone: &str) -> Result<Vec<ComputeInstance>, ProviderError>;
}

/// Cloud SQL Admin operations on one project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SqlAdminApi: Send + Sync {
    /// Look up a database instance
    async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, ProviderError>;

    /// Request creation of a database instance
    async fn insert_instance(
        &self,
        instance: &DatabaseInstance,
    ) -> Result<Operation, ProviderError>;

    /// Request deletion of a database instance
    async fn delete_instance(&self, name: &str) -> Result<Operation, ProviderError>;
}

/// Builds authenticated API handles for a Project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Compute Engine handle scoped to `project`
    async fn compute(&self, project: &Project) -> Result<Arc<dyn ComputeApi>, ReconcileError>;

    /// Cloud SQL Admin handle scoped to `project`
    async fn sql_admin(&self, project: &Project) -> Result<Arc<dyn SqlAdminApi>, ReconcileError>;
}

#[async_trait]
impl ComputeApi for ComputeClient {
    async fn get_instance(&self, zone: &str, name: &str) -> Result<ComputeInstance, ProviderError> {
        ComputeClient::get_instance(self, zone, name).await
    }

    async fn insert_instance(
        &self,
        zone: &str,
        instance: &ComputeInstance,
    ) -> Result<Operation, ProviderError> {
        ComputeClient::insert_instance(self, zone, instance).await
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation, ProviderError> {
        ComputeClient::delete_instance(self, zone, name).await
    }

    async fn list_instances(&self, zone: &str) -> Result<Vec<ComputeInstance>, ProviderError> {
        ComputeClient::list_instances(self, zone).await
    }
}

#[async_trait]
impl SqlAdminApi for SqlAdminClient {
    async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, ProviderError> {
        SqlAdminClient::get_instance(self, name).await
    }

    async fn insert_instance(
        &self,
        instance: &DatabaseInstance,
    ) -> Result<Operation, ProviderError> {
        SqlAdminClient::insert_instance(self, instance).await
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation, ProviderError> {
        SqlAdminClient::delete_instance(self, name).await
    }
}

/// Base URLs of the Google APIs, overridable for tests
#[derive(Clone, Debug)]
pub struct Endpoints {
    /// Compute Engine v1 base URL
    pub compute: String,
    /// Cloud SQL Admin v1beta4 base URL
    pub sql_admin: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: cloudcrd_gcp::compute::COMPUTE_BASE_URL.to_string(),
            sql_admin: cloudcrd_gcp::sqladmin::SQL_ADMIN_BASE_URL.to_string(),
        }
    }
}

/// Factory that authenticates with the Project's service-account secret
pub struct GoogleProviderFactory {
    credentials: Arc<dyn CredentialResolver>,
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl GoogleProviderFactory {
    /// Factory against the production endpoints
    pub fn new(credentials: Arc<dyn CredentialResolver>, http: reqwest::Client) -> Self {
        Self::with_endpoints(credentials, http, Endpoints::default())
    }

    /// Factory against custom endpoints
    pub fn with_endpoints(
        credentials: Arc<dyn CredentialResolver>,
        http: reqwest::Client,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            credentials,
            http,
            endpoints,
        }
    }
}

#[async_trait]
impl ProviderFactory for GoogleProviderFactory {
    async fn compute(&self, project: &Project) -> Result<Arc<dyn ComputeApi>, ReconcileError> {
        let tokens = self.credentials.token_provider(project, &[COMPUTE_SCOPE]).await?;
        Ok(Arc::new(ComputeClient::with_base_url(
            self.http.clone(),
            &self.endpoints.compute,
            project.spec.name.clone(),
            tokens,
        )))
    }

    async fn sql_admin(&self, project: &Project) -> Result<Arc<dyn SqlAdminApi>, ReconcileError> {
        let tokens = self.credentials.token_provider(project, &[SQL_ADMIN_SCOPE]).await?;
        Ok(Arc::new(SqlAdminClient::with_base_url(
            self.http.clone(),
            &self.endpoints.sql_admin,
            project.spec.name.clone(),
            tokens,
        )))
    }
}
