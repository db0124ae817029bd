//! Google Cloud provider boundary for cloudcrd
//!
//! - [`auth`]: service-account keys and OAuth2 JWT-bearer token minting
//! - [`ComputeClient`]: Compute Engine instances
//! - [`SqlAdminClient`]: Cloud SQL instances
//!
//! Every failed call comes back as a [`ProviderError`] already classified
//! into an [`ErrorClass`].

#![deny(missing_docs)]

pub mod auth;
pub mod compute;
pub mod error;
mod http;
pub mod sqladmin;
pub mod types;

pub use auth::{AccessTokenProvider, ServiceAccountKey, ServiceAccountTokenSource, StaticToken};
pub use compute::ComputeClient;
pub use error::{CredentialError, ErrorClass, ProviderError};
pub use http::default_http_client;
pub use sqladmin::SqlAdminClient;
