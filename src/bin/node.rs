//! Node binary: runs the store and coordinator of one or more cluster members

use anyhow::Context;
use clap::Parser;
use quorumkv::common::ClusterConfig;
use quorumkv::{Coordinator, Monitor, PeerClient, ReplicaDirectory, StoreEngine, StoreServer};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quorumkv-node")]
#[command(about = "quorumkv storage and coordinator node")]
#[command(version)]
struct Cli {
    /// Cluster configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Index of a node to run from the configured list (repeatable)
    #[arg(long = "node", conflicts_with = "all")]
    nodes: Vec<usize>,

    /// Run every configured node in this process
    #[arg(long)]
    all: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClusterConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let indexes: Vec<usize> = if cli.all || cli.nodes.is_empty() {
        (0..config.nodes.len()).collect()
    } else {
        cli.nodes.clone()
    };
    if let Some(bad) = indexes.iter().find(|&&i| i >= config.nodes.len()) {
        anyhow::bail!(
            "node index {} out of range, {} nodes configured",
            bad,
            config.nodes.len()
        );
    }

    tracing::info!("Starting quorumkv {} ({} local nodes)", quorumkv::VERSION, indexes.len());
    tracing::info!(
        "  N={} W={} R={} hash={}",
        config.replication_factor,
        config.write_quorum(),
        config.read_quorum(),
        config.hash_algorithm
    );

    // Stores first, so local coordinators can reach them from the first heartbeat
    let mut stores = JoinSet::new();
    for &i in &indexes {
        let node = &config.nodes[i];
        let engine = Arc::new(StoreEngine::with_capacity(config.store_capacity));
        let server = StoreServer::bind(node.store_addr(), engine)
            .await
            .with_context(|| format!("binding store {} on {}", i, node.store_addr()))?;
        stores.spawn(server.serve());
    }

    let mut coordinators = JoinSet::new();
    for &i in &indexes {
        let node = &config.nodes[i];
        let directory = Arc::new(ReplicaDirectory::from_config(&config));
        let bind: SocketAddr = if node.address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let client = PeerClient::bind(bind, config.rpc).await?;

        let monitor = Arc::new(Monitor::new(
            directory.clone(),
            client.clone(),
            config.heartbeat_interval(),
        ));
        monitor.start();

        let coordinator = Coordinator::bind(node.coordinator_addr(), &config, directory, client)
            .await
            .with_context(|| format!("binding coordinator {} on {}", i, node.coordinator_addr()))?;
        coordinators.spawn(coordinator.serve());
    }

    tracing::info!("✓ Node ready");

    tokio::select! {
        Some(result) = coordinators.join_next() => match result {
            Ok(Ok(())) => tracing::info!("Coordinator stopped, exiting"),
            Ok(Err(e)) => tracing::error!("Coordinator error: {}", e),
            Err(e) => tracing::error!("Coordinator task failed: {}", e),
        },
        Some(result) = stores.join_next() => match result {
            Ok(Ok(())) => tracing::warn!("Store stopped, exiting"),
            Ok(Err(e)) => tracing::error!("Store error: {}", e),
            Err(e) => tracing::error!("Store task failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, exiting"),
    }

    Ok(())
}
