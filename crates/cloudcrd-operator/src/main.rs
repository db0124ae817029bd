//! cloudcrd - Google Cloud resources from Kubernetes custom resources

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cloudcrd_common::telemetry::{init_telemetry, TelemetryConfig};
use cloudcrd_gcp::default_http_client;
use cloudcrd_operator::crds::crd_manifests;
use cloudcrd_operator::runner::build_operator;
use cloudcrd_operator::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let yaml = crd_manifests()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        print!("{yaml}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "cloudcrd-operator".to_string(),
        ..TelemetryConfig::default()
    })?;

    let client = cli.client().await?;
    let http = default_http_client()?;
    let policies = cli.absence_policies();
    info!(
        workers = cli.workers,
        cache_sync_timeout_secs = cli.cache_sync_timeout,
        database_forbidden_as_absent = policies.database.forbidden_means_absent,
        instance_forbidden_as_absent = policies.instance.forbidden_means_absent,
        "starting cloudcrd controllers"
    );

    let supervisor = build_operator(client, http, policies, cli.supervisor_config())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    if let Err(e) = supervisor.run(shutdown).await {
        error!(error = %e, "controller stopped with error");
        return Err(e.into());
    }

    info!("cloudcrd stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler, relying on SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    shutdown.cancel();
}
