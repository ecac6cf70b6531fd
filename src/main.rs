//! Roost server - per-tenant AI agent workload provisioning

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use roost::api::{api_router, AppState};
use roost::cluster::KubeClusterClient;
use roost::config::Config;
use roost::reconcile::Reconciler;
use roost::relay::AgentRelay;
use roost::session::MemorySessionStore;

/// Roost - provisions one agent workload per tenant on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "roost", version, about, long_about = None)]
struct Cli {
    /// Address the HTTP API listens on
    #[arg(long, env = "ROOST_LISTEN_ADDR", default_value = roost::DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// Namespace agent workloads are provisioned into
    #[arg(long, env = "ROOST_NAMESPACE", default_value = roost::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Container image every agent Pod runs
    #[arg(long, env = "ROOST_AGENT_IMAGE")]
    agent_image: String,

    /// Budget for the new-Pod detection phase, in seconds
    #[arg(
        long,
        env = "ROOST_POD_TIMEOUT_SECS",
        default_value_t = roost::DEFAULT_POD_TIMEOUT_SECS
    )]
    pod_timeout_secs: u64,

    /// Sleep between rollout polls, in seconds
    #[arg(
        long,
        env = "ROOST_POLL_INTERVAL_SECS",
        default_value_t = roost::DEFAULT_POLL_INTERVAL_SECS
    )]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs.
    // Both the Kubernetes client and the agent relay depend on a working
    // TLS implementation; refusing to start beats failing on first use.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {e:?}. \
             This may indicate aws-lc-rs was not compiled correctly or there is a \
             conflict with another crypto provider."
        );
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = Config {
        namespace: cli.namespace,
        agent_image: cli.agent_image,
        pod_timeout: Duration::from_secs(cli.pod_timeout_secs),
        poll_interval: Duration::from_secs(cli.poll_interval_secs),
        ..Config::default()
    };
    config.validate()?;

    // In-cluster configuration when running in a Pod, kubeconfig otherwise
    let client = Client::try_default().await?;
    let cluster = Arc::new(KubeClusterClient::new(client, config.namespace.clone()));

    let state = AppState {
        reconciler: Reconciler::new(cluster, config.clone()),
        relay: AgentRelay::new()?,
        sessions: Arc::new(MemorySessionStore::new()),
    };

    let listener = tokio::net::TcpListener::bind(&cli.listen_addr).await?;
    tracing::info!(
        addr = %cli.listen_addr,
        namespace = %config.namespace,
        image = %config.agent_image,
        "roost serving"
    );
    axum::serve(listener, api_router(Arc::new(state))).await?;

    Ok(())
}
