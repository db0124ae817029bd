//! Credential Resolver: Project -> service-account secret -> access tokens

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::crd::Project;
use cloudcrd_common::{ReconcileError, SERVICE_ACCOUNT_SECRET_KEY};
use cloudcrd_gcp::{AccessTokenProvider, ServiceAccountKey, ServiceAccountTokenSource};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Resolves the credentials a Project points at
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Token source for the Project's service account with the given scopes
    async fn token_provider(
        &self,
        project: &Project,
        scopes: &[&'static str],
    ) -> Result<Arc<dyn AccessTokenProvider>, ReconcileError>;
}

/// Read access to Secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Fetch a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;
}

/// [`SecretReader`] backed by the Kubernetes API
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    /// Reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }
}

struct CachedSource {
    key_json: Vec<u8>,
    source: Arc<dyn AccessTokenProvider>,
}

/// Resolver reading the key JSON from the Secret named in
/// `spec.serviceaccountsecret`, in the Project's namespace.
///
/// Token sources are reused while the key JSON is unchanged, so access tokens
/// are cached across reconciliations and a rotated key takes effect on the
/// next lookup.
pub struct SecretCredentialResolver {
    secrets: Arc<dyn SecretReader>,
    http: reqwest::Client,
    sources: Mutex<HashMap<(String, String, String), CachedSource>>,
}

impl SecretCredentialResolver {
    /// Resolver reading secrets through `secrets`
    pub fn new(secrets: Arc<dyn SecretReader>, http: reqwest::Client) -> Self {
        Self {
            secrets,
            http,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Number of token sources currently cached
    pub fn cached_sources(&self) -> usize {
        self.sources.lock().len()
    }
}

#[async_trait]
impl CredentialResolver for SecretCredentialResolver {
    async fn token_provider(
        &self,
        project: &Project,
        scopes: &[&'static str],
    ) -> Result<Arc<dyn AccessTokenProvider>, ReconcileError> {
        let namespace = project.namespace().unwrap_or_default();
        let project_key = format!("{}/{}", namespace, project.name_any());
        let secret_name = &project.spec.service_account_secret;

        if secret_name.is_empty() {
            return Err(ReconcileError::credentials(
                project_key,
                "spec.serviceaccountsecret is not set",
            ));
        }

        let secret = self
            .secrets
            .get_secret(&namespace, secret_name)
            .await
            .map_err(|e| {
                ReconcileError::credentials(
                    project_key.clone(),
                    format!("error getting secret '{}': {}", secret_name, e),
                )
            })?
            .ok_or_else(|| {
                ReconcileError::credentials(
                    project_key.clone(),
                    format!("secret '{}' not found", secret_name),
                )
            })?;

        let key_json = secret
            .data
            .as_ref()
            .and_then(|data| data.get(SERVICE_ACCOUNT_SECRET_KEY))
            .map(|bytes| bytes.0.clone())
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| {
                ReconcileError::credentials(
                    project_key.clone(),
                    format!(
                        "secret '{}' does not contain a field '{}'",
                        secret_name, SERVICE_ACCOUNT_SECRET_KEY
                    ),
                )
            })?;

        let cache_key = (namespace.clone(), secret_name.clone(), scopes.join(" "));
        if let Some(cached) = self.sources.lock().get(&cache_key) {
            if cached.key_json == key_json {
                return Ok(cached.source.clone());
            }
        }

        let key = ServiceAccountKey::from_json(&key_json)
            .map_err(|e| ReconcileError::credentials(project_key.clone(), e.to_string()))?;
        let source = ServiceAccountTokenSource::shared(key, scopes, self.http.clone())
            .map_err(|e| ReconcileError::credentials(project_key.clone(), e.to_string()))?;

        debug!(project = %project_key, secret = %secret_name, "built token source");
        self.sources.lock().insert(
            cache_key,
            CachedSource {
                key_json,
                source: source.clone(),
            },
        );
        Ok(source)
    }
}
