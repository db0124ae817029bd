//! Authenticated JSON transport shared by the API clients

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::auth::AccessTokenProvider;
use crate::error::ProviderError;
use crate::types::ErrorEnvelope;

/// Per-request timeout for API calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the HTTP client used for API calls and token exchange
pub fn default_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .user_agent(concat!("cloudcrd/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Bearer-authenticated JSON requests against one API base URL
#[derive(Clone)]
pub(crate) struct ApiTransport {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl ApiTransport {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        action: &'static str,
        resource: &str,
    ) -> Result<RequestBuilder, ProviderError> {
        let token = self.tokens.access_token().await?;
        let url = self.url(path);
        trace!(%method, %url, action, resource, "provider request");
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        action: &'static str,
        resource: &str,
    ) -> Result<T, ProviderError> {
        let request = self
            .request(Method::GET, path, action, resource)
            .await?
            .query(query);
        send(request, action, resource).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        action: &'static str,
        resource: &str,
    ) -> Result<T, ProviderError> {
        let request = self
            .request(Method::POST, path, action, resource)
            .await?
            .json(body);
        send(request, action, resource).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        action: &'static str,
        resource: &str,
    ) -> Result<T, ProviderError> {
        let request = self.request(Method::DELETE, path, action, resource).await?;
        send(request, action, resource).await
    }
}

/// Send a request and decode the body, classifying any failure
async fn send<T: DeserializeOwned>(
    request: RequestBuilder,
    action: &'static str,
    resource: &str,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::transport(action, resource, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::api(
            action,
            resource,
            status.as_u16(),
            error_message(&body),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| {
            ProviderError::transport(action, resource, format!("invalid response body: {}", e))
        })
}

/// Pull `error.message` out of a Google error body, falling back to the raw text
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.trim().to_string(),
    }
}
