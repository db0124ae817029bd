//! Database reconciler: Cloud SQL instances
//!
//! A new Cloud SQL instance authorizes the external addresses of every
//! Compute Engine instance in the Project's zone, so the VMs managed next to
//! it can connect. The list is taken once, at creation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cloudcrd_common::crd::{Database, DatabaseSpec};
use cloudcrd_common::events::actions;
use cloudcrd_common::ReconcileError;
use cloudcrd_gcp::types::{AclEntry, ComputeInstance, DatabaseInstance, IpConfiguration, Settings};
use cloudcrd_gcp::ErrorClass;
use cloudcrd_runtime::Reconciler;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::context::{project_key, provider_error, Context, Outcome};

/// Tier used when `spec.type` is empty
pub const DEFAULT_TIER: &str = "db-n1-standard-1";

const BACKEND_TYPE: &str = "SECOND_GEN";
const DATABASE_VERSION: &str = "MYSQL_5_7";

/// Reconciler for [`Database`]
pub struct DatabaseReconciler {
    ctx: Arc<Context>,
}

impl DatabaseReconciler {
    /// Reconciler using `ctx`
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn ensure(&self, database: &Database) -> Result<Outcome, ReconcileError> {
        let name = database.name_any();
        let project = self.ctx.project_for(database, database.spec.project_ref())?;
        let project_key = project_key(&project);
        let sql = self.ctx.providers.sql_admin(&project).await?;

        match sql.get_instance(&name).await {
            Ok(existing) => {
                debug!(
                    database = %name,
                    state = existing.state.as_deref().unwrap_or_default(),
                    "database exists"
                );
                return Ok(Outcome::Present);
            }
            Err(e) if self.ctx.policies.database.is_absent(&e, &name) => {}
            Err(e) => return Err(provider_error(&project_key, e)),
        }

        let compute = self.ctx.providers.compute(&project).await?;
        let instances = compute
            .list_instances(&project.spec.zone)
            .await
            .map_err(|e| provider_error(&project_key, e))?;
        let networks = authorized_networks(&instances, &database.spec.authorized_networks);
        debug!(
            database = %name,
            networks = networks.len(),
            "collected authorized networks"
        );

        let body = build_database(&name, &database.spec, networks);
        let op = sql
            .insert_instance(&body)
            .await
            .map_err(|e| provider_error(&project_key, e))?;

        info!(
            database = %name,
            gcp_project = %project.spec.name,
            tier = %body.settings.as_ref().map(|s| s.tier.as_str()).unwrap_or_default(),
            operation = %op.name,
            "database provisioning requested"
        );
        Ok(Outcome::Requested)
    }

    async fn remove(&self, database: &Database) -> Result<Outcome, ReconcileError> {
        let name = database.name_any();
        let project = self.ctx.project_for(database, database.spec.project_ref())?;
        let project_key = project_key(&project);
        let sql = self.ctx.providers.sql_admin(&project).await?;

        match sql.delete_instance(&name).await {
            Ok(op) => {
                info!(database = %name, operation = %op.name, "database deletion requested");
                Ok(Outcome::Requested)
            }
            Err(e) if e.class() == ErrorClass::NotFound => {
                info!(database = %name, "database already absent");
                Ok(Outcome::AlreadyAbsent)
            }
            Err(e) => Err(provider_error(&project_key, e)),
        }
    }
}

#[async_trait]
impl Reconciler<Database> for DatabaseReconciler {
    async fn create_or_update(&self, database: Arc<Database>) -> Result<(), ReconcileError> {
        let result = self.ensure(&database).await;
        self.ctx.report(database.as_ref(), actions::CREATE, result).await
    }

    async fn delete(&self, database: Arc<Database>) -> Result<(), ReconcileError> {
        let result = self.remove(&database).await;
        self.ctx.report(database.as_ref(), actions::DELETE, result).await
    }
}

/// NAT addresses of `instances` followed by `extra` CIDRs, first occurrence wins
pub fn authorized_networks(instances: &[ComputeInstance], extra: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    instances
        .iter()
        .flat_map(|instance| instance.nat_ips())
        .chain(extra.iter().map(String::as_str))
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.to_string()))
        .map(str::to_string)
        .collect()
}

/// Request body for creating the Cloud SQL instance `name`
pub fn build_database(name: &str, spec: &DatabaseSpec, networks: Vec<String>) -> DatabaseInstance {
    let tier = if spec.tier.is_empty() {
        DEFAULT_TIER.to_string()
    } else {
        spec.tier.clone()
    };

    DatabaseInstance {
        name: name.to_string(),
        backend_type: BACKEND_TYPE.to_string(),
        database_version: DATABASE_VERSION.to_string(),
        state: None,
        settings: Some(Settings {
            tier,
            ip_configuration: Some(IpConfiguration {
                authorized_networks: networks
                    .into_iter()
                    .map(|value| AclEntry { value })
                    .collect(),
            }),
        }),
    }
}
