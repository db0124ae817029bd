//! Cloud SQL Admin v1beta4 instances client

use std::sync::Arc;

use crate::auth::AccessTokenProvider;
use crate::error::ProviderError;
use crate::http::ApiTransport;
use crate::types::{DatabaseInstance, Operation};

/// Production endpoint of the Cloud SQL Admin API
pub const SQL_ADMIN_BASE_URL: &str = "https://sqladmin.googleapis.com/sql/v1beta4";

/// Cloud SQL instances of one Google Cloud project
#[derive(Clone)]
pub struct SqlAdminClient {
    transport: ApiTransport,
    project: String,
}

impl SqlAdminClient {
    /// Client for `project` against the production endpoint
    pub fn new(
        http: reqwest::Client,
        project: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self::with_base_url(http, SQL_ADMIN_BASE_URL, project, tokens)
    }

    /// Client against a custom endpoint
    pub fn with_base_url(
        http: reqwest::Client,
        base_url: &str,
        project: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            transport: ApiTransport::new(http, base_url, tokens),
            project: project.into(),
        }
    }

    /// Project this client acts on
    pub fn project(&self) -> &str {
        &self.project
    }

    fn instances_path(&self) -> String {
        format!("projects/{}/instances", urlencoding::encode(&self.project))
    }

    /// Fetch one database instance
    pub async fn get_instance(&self, name: &str) -> Result<DatabaseInstance, ProviderError> {
        let path = format!("{}/{}", self.instances_path(), urlencoding::encode(name));
        self.transport.get(&path, &[], "get database", name).await
    }

    /// Request creation of a database instance
    pub async fn insert_instance(
        &self,
        instance: &DatabaseInstance,
    ) -> Result<Operation, ProviderError> {
        self.transport
            .post(&self.instances_path(), instance, "insert database", &instance.name)
            .await
    }

    /// Request deletion of a database instance
    pub async fn delete_instance(&self, name: &str) -> Result<Operation, ProviderError> {
        let path = format!("{}/{}", self.instances_path(), urlencoding::encode(name));
        self.transport.delete(&path, "delete database", name).await
    }
}
