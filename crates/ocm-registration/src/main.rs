//! OCM registration agent - spoke-side client certificate state machine

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ocm_registration::csr::V1CsrControl;
use ocm_registration::spoke::{
    generate_agent_name, BootstrapConfig, ClientCertController, SpokeAgentOptions,
    SpokeSecretStoreImpl,
};

/// OCM registration agent - registers this cluster with the hub
#[derive(Parser, Debug)]
#[command(name = "ocm-registration", version, about, long_about = None)]
struct Cli {
    /// Name this cluster registers under on the hub
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: String,

    /// Agent identity suffix; generated when omitted
    #[arg(long)]
    agent_name: Option<String>,

    /// Path to the bootstrap kubeconfig
    #[arg(long, default_value = "/spoke/bootstrap/kubeconfig")]
    bootstrap_kubeconfig: PathBuf,

    /// Namespace holding the agent's secrets
    #[arg(long, default_value = "open-cluster-management-agent")]
    namespace: String,

    /// Name of the durable hub identity secret
    #[arg(long, default_value = "hub-kubeconfig-secret")]
    hub_kubeconfig_secret: String,

    /// Requested client certificate lifetime in seconds (0 = signer default)
    #[arg(long, default_value = "0")]
    client_cert_expiration_seconds: i32,

    /// Seconds between state machine passes
    #[arg(long, default_value = "30")]
    resync_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let options = SpokeAgentOptions {
        bootstrap_kubeconfig: cli.bootstrap_kubeconfig.display().to_string(),
        hub_kubeconfig_secret: cli.hub_kubeconfig_secret.clone(),
        client_cert_expiration_seconds: cli.client_cert_expiration_seconds,
        ..Default::default()
    };
    options.validate()?;

    let agent_name = cli.agent_name.unwrap_or_else(generate_agent_name);
    info!(cluster = %cli.cluster_name, agent = %agent_name, "starting registration agent");

    // The bootstrap credential gives us the hub endpoint and a client that
    // may create signing requests there.
    let bootstrap_kubeconfig = Kubeconfig::read_from(&cli.bootstrap_kubeconfig)?;
    let bootstrap = BootstrapConfig::from_kubeconfig(&bootstrap_kubeconfig)?;
    let hub_config =
        Config::from_custom_kubeconfig(bootstrap_kubeconfig, &KubeConfigOptions::default()).await?;
    let hub_client = Client::try_from(hub_config)?;

    // The spoke's own API server holds the durable identity secret.
    let spoke_client = Client::try_default().await?;

    let controller = ClientCertController::new(
        cli.cluster_name,
        agent_name,
        Some(bootstrap),
        Arc::new(SpokeSecretStoreImpl::new(
            spoke_client,
            cli.namespace,
            cli.hub_kubeconfig_secret,
        )),
        Arc::new(V1CsrControl::new(hub_client)),
        (cli.client_cert_expiration_seconds != 0).then_some(cli.client_cert_expiration_seconds),
    );

    let mut interval = tokio::time::interval(Duration::from_secs(cli.resync_secs));
    loop {
        interval.tick().await;
        match controller.sync(chrono::Utc::now()).await {
            Ok(state) => info!(state = ?state, "registration state"),
            Err(e) => warn!(error = %e, "registration pass failed"),
        }
    }
}
