//! Command-line configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use cloudcrd_controller::{AbsencePolicies, AbsencePolicy};
use cloudcrd_runtime::SupervisorConfig;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// cloudcrd - provision Google Cloud VMs and Cloud SQL instances from
/// Kubernetes custom resources
#[derive(Parser, Debug)]
#[command(name = "cloudcrd", version, about, long_about = None)]
pub struct Cli {
    /// Path to a kubeconfig; in-cluster or default inference when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Print the CustomResourceDefinitions as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Workers per resource kind
    #[arg(long, env = "CLOUDCRD_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Seconds to wait for the initial cache sync before giving up
    #[arg(long, env = "CLOUDCRD_CACHE_SYNC_TIMEOUT", default_value_t = 60)]
    pub cache_sync_timeout: u64,

    /// Treat HTTP 403 on Cloud SQL lookups as "instance does not exist"
    #[arg(
        long,
        env = "CLOUDCRD_DATABASE_FORBIDDEN_AS_ABSENT",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub database_forbidden_as_absent: bool,

    /// Treat HTTP 403 on Compute Engine lookups as "instance does not exist"
    #[arg(
        long,
        env = "CLOUDCRD_INSTANCE_FORBIDDEN_AS_ABSENT",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub instance_forbidden_as_absent: bool,
}

impl Cli {
    /// Supervisor settings derived from the flags
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            workers_per_kind: self.workers.max(1),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout),
            ..SupervisorConfig::default()
        }
    }

    /// Absence policies derived from the flags
    pub fn absence_policies(&self) -> AbsencePolicies {
        AbsencePolicies {
            instance: AbsencePolicy {
                forbidden_means_absent: self.instance_forbidden_as_absent,
            },
            database: AbsencePolicy {
                forbidden_means_absent: self.database_forbidden_as_absent,
            },
        }
    }

    /// Kubernetes client from `--kubeconfig`, or inferred from the environment
    pub async fn client(&self) -> anyhow::Result<Client> {
        match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    anyhow::anyhow!("failed to read kubeconfig {}: {}", path.display(), e)
                })?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Ok(Client::try_from(config)?)
            }
            None => Ok(Client::try_default().await?),
        }
    }
}
