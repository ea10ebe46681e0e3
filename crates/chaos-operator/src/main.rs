//! Chaos controller - drives chaos experiments on Kubernetes

use std::sync::Arc;

use chaos_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use chaos_common::telemetry::{init_telemetry, TelemetryConfig};
use chaos_common::CHAOS_SYSTEM_NAMESPACE;
use chaos_operator::config::{Cli, ControllerConfig};
use chaos_operator::controller_runner::{build_chaos_controllers, build_registry};
use chaos_operator::crds::{crds_yaml, ensure_crds};
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let yaml = crds_yaml().map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        println!("{yaml}");
        return Ok(());
    }

    let _telemetry = init_telemetry(TelemetryConfig::default())?;

    let args = cli.controller_args()?;
    let config = ControllerConfig::from_args(&args)?;
    run_controller(config).await
}

/// Cancel `token` on SIGINT or SIGTERM
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("Shutdown signal received");
        token.cancel();
    });
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(
        cluster_scoped = config.scope.cluster_scoped,
        workers = config.workers,
        "Chaos controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crds {
        ensure_crds(&client).await?;
    }

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let cancel = if config.leader_election {
        let identity = std::env::var("POD_NAME")
            .unwrap_or_else(|_| format!("chaos-controller-{}", std::process::id()));
        let namespace = std::env::var("POD_NAMESPACE")
            .unwrap_or_else(|_| CHAOS_SYSTEM_NAMESPACE.to_string());
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &namespace,
            &identity,
        ));

        let lost = tokio::select! {
            lost = elector.acquire() => lost,
            _ = shutdown.cancelled() => {
                tracing::info!("Shut down before acquiring leadership");
                return Ok(());
            }
        };

        let combined = shutdown.child_token();
        let on_loss = combined.clone();
        tokio::spawn(async move {
            lost.cancelled().await;
            on_loss.cancel();
        });
        combined
    } else {
        shutdown.clone()
    };

    let registry = build_registry(&client, &config);
    let controllers = build_chaos_controllers(client, &config, &registry, cancel.clone());
    if controllers.is_empty() {
        anyhow::bail!("no experiment kind has a registered injector");
    }

    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("All chaos controllers completed");
        }
        _ = cancel.cancelled() => {
            tracing::info!("Stopping chaos controllers");
        }
    }

    tracing::info!("Chaos controller shutting down");
    Ok(())
}
