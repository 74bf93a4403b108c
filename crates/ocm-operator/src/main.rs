//! OCM operator - hub and spoke control-plane reconcilers

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ocm_common::api::{ClusterManager, Klusterlet};
use ocm_operator::certrotation::{
    hub_targets, CertRotationConfig, CertRotationController, KubeCertStore,
};
use ocm_operator::klusterlet::bootstrap::AgentNamespaceClientImpl;
use ocm_operator::{clustermanager, klusterlet};

/// OCM operator - reconciles ClusterManager and Klusterlet resources
#[derive(Parser, Debug)]
#[command(name = "ocm-operator", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub operator (ClusterManager reconciler + cert rotation)
    ClusterManager(ClusterManagerArgs),

    /// Run the spoke operator (Klusterlet reconciler + rebootstrap controller)
    Klusterlet(KlusterletArgs),
}

#[derive(Parser, Debug)]
struct ClusterManagerArgs {
    /// Steady-state resync period in seconds
    #[arg(long, default_value = "60")]
    resync_secs: u64,

    /// Signing certificate validity in seconds
    #[arg(long, default_value = "7776000")]
    signing_validity_secs: i64,

    /// Serving certificate validity in seconds
    #[arg(long, default_value = "2592000")]
    target_validity_secs: i64,
}

#[derive(Parser, Debug)]
struct KlusterletArgs {
    /// Steady-state resync period in seconds
    #[arg(long, default_value = "60")]
    resync_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = Client::try_default().await?;

    match cli.command {
        Commands::ClusterManager(args) => run_cluster_manager(client, args).await,
        Commands::Klusterlet(args) => run_klusterlet(client, args).await,
    }

    Ok(())
}

async fn run_cluster_manager(client: Client, args: ClusterManagerArgs) {
    info!("starting hub operator");

    let rotation = CertRotationController::new(
        KubeCertStore::new(client.clone(), ocm_common::HUB_NAMESPACE, "cluster-manager"),
        CertRotationConfig {
            signing_validity: chrono::Duration::seconds(args.signing_validity_secs),
            target_validity: chrono::Duration::seconds(args.target_validity_secs),
            resync_interval: Duration::from_secs(args.resync_secs),
            ..Default::default()
        },
        hub_targets("cluster-manager"),
    );
    tokio::spawn(rotation.run());

    let ctx = Arc::new(clustermanager::Context {
        client: Arc::new(clustermanager::HubClientImpl::new(client.clone())),
        resync: Duration::from_secs(args.resync_secs),
    });

    let cluster_managers: Api<ClusterManager> = Api::all(client);
    Controller::new(cluster_managers, WatcherConfig::default())
        .shutdown_on_signal()
        .run(clustermanager::reconcile, clustermanager::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!(cluster_manager = %object.name, "reconciled"),
                Err(e) => tracing::warn!(error = %e, "reconcile error"),
            }
        })
        .await;
}

async fn run_klusterlet(client: Client, args: KlusterletArgs) {
    info!("starting spoke operator");

    let klusterlets: Api<Klusterlet> = Api::all(client.clone());
    tokio::spawn(klusterlet::bootstrap::run(
        klusterlets.clone(),
        Arc::new(AgentNamespaceClientImpl::new(client.clone())),
        Duration::from_secs(args.resync_secs),
    ));

    let ctx = Arc::new(klusterlet::Context {
        client: Arc::new(klusterlet::SpokeClientImpl::new(client)),
        resync: Duration::from_secs(args.resync_secs),
    });

    Controller::new(klusterlets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(klusterlet::reconcile, klusterlet::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!(klusterlet = %object.name, "reconciled"),
                Err(e) => tracing::warn!(error = %e, "reconcile error"),
            }
        })
        .await;
}
