//! Muster Server
//!
//! Standalone registry node binary.

use anyhow::Context;
use clap::Parser;
use muster_cluster::{Gossiper, HttpPeerTransport};
use muster_core::{init_telemetry, MusterConfig, NodeId, TelemetryConfig, WallClockTime};
use muster_registry::{Registry, RegistryScheduler, ReplicationSink};
use muster_server::{api, state::AppState};
use std::sync::Arc;

/// Muster server CLI
#[derive(Parser, Debug)]
#[command(name = "muster-server")]
#[command(about = "Lease-based service registry node")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "muster.yaml")]
    config: String,

    /// Bind address (overrides node.bind_address)
    #[arg(short, long)]
    bind: Option<String>,

    /// Peer base URL; repeat for each peer (replaces cluster.peer_node_addresses)
    #[arg(short, long = "peer")]
    peers: Vec<String>,

    /// Node identifier (overrides node.node_id)
    #[arg(long)]
    node_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<MusterConfig> {
        let mut config = MusterConfig::load_or_default(&self.config)
            .with_context(|| format!("loading {}", self.config))?;

        if let Some(bind) = &self.bind {
            config.node.bind_address = bind.clone();
        }
        if let Some(node_id) = &self.node_id {
            config.node.node_id = Some(node_id.clone());
        }
        if !self.peers.is_empty() {
            config.cluster.peer_node_addresses = self.peers.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig::from_env().with_verbosity(cli.verbose))?;

    let config = cli.resolve_config()?;
    let time = Arc::new(WallClockTime::new());
    let node_id = match &config.node.node_id {
        Some(id) => NodeId::new(id.clone())?,
        None => NodeId::generate(time.as_ref()),
    };
    let bind_address = config.node.bind_address.clone();

    tracing::info!(
        node_id = %node_id,
        bind = %bind_address,
        config = %cli.config,
        peers = config.cluster.peer_node_addresses.len(),
        "muster server starting"
    );

    let gossiper = if config.cluster.is_standalone() {
        None
    } else {
        Some(Arc::new(Gossiper::new(&config.cluster)))
    };
    let sink = gossiper
        .clone()
        .map(|g| g as Arc<dyn ReplicationSink>);
    let request_timeout_ms = config.cluster.request_timeout_ms;

    let registry = Arc::new(Registry::with_providers(config, node_id, time, sink));

    let scheduler = RegistryScheduler::new(registry.clone());
    scheduler.start();

    if let Some(gossiper) = &gossiper {
        let transport = Arc::new(HttpPeerTransport::new(request_timeout_ms)?);
        gossiper.start(registry.clone(), transport)?;
    }

    let app = api::router(AppState::new(registry, gossiper.clone()));
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    if let Some(gossiper) = &gossiper {
        gossiper.stop().await?;
    }
    tracing::info!("muster server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
