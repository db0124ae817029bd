//! Compute Engine v1 instances client

use std::sync::Arc;

use crate::auth::AccessTokenProvider;
use crate::error::ProviderError;
use crate::http::ApiTransport;
use crate::types::{ComputeInstance, InstanceList, Operation};

/// Production endpoint of the Compute Engine API
pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Instances of one Google Cloud project
#[derive(Clone)]
pub struct ComputeClient {
    transport: ApiTransport,
    project: String,
}

impl ComputeClient {
    /// Client for `project` against the production endpoint
    pub fn new(
        http: reqwest::Client,
        project: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self::with_base_url(http, COMPUTE_BASE_URL, project, tokens)
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

    fn instances_path(&self, zone: &str) -> String {
        format!(
            "projects/{}/zones/{}/instances",
            urlencoding::encode(&self.project),
            urlencoding::encode(zone)
        )
    }

    /// Fetch one instance
    pub async fn get_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<ComputeInstance, ProviderError> {
        let path = format!("{}/{}", self.instances_path(zone), urlencoding::encode(name));
        self.transport.get(&path, &[], "get instance", name).await
    }

    /// Request creation of an instance
    pub async fn insert_instance(
        &self,
        zone: &str,
        instance: &ComputeInstance,
    ) -> Result<Operation, ProviderError> {
        self.transport
            .post(&self.instances_path(zone), instance, "insert instance", &instance.name)
            .await
    }

    /// Request deletion of an instance
    pub async fn delete_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<Operation, ProviderError> {
        let path = format!("{}/{}", self.instances_path(zone), urlencoding::encode(name));
        self.transport.delete(&path, "delete instance", name).await
    }

    /// Every instance in `zone`, following pagination
    pub async fn list_instances(
        &self,
        zone: &str,
    ) -> Result<Vec<ComputeInstance>, ProviderError> {
        let path = self.instances_path(zone);
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, &str)> = match page_token.as_deref() {
                Some(token) => vec![("pageToken", token)],
                None => Vec::new(),
            };
            let page: InstanceList = self
                .transport
                .get(&path, &query, "list instances", zone)
                .await?;
            instances.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(instances),
            }
        }
    }
}
