//! Stevedore daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use stevedore::adapters::{DockerCluster, MemoryStore, MockCluster, SqliteStore};
use stevedore::domain::ports::cluster::Cluster;
use stevedore::domain::ports::store::Store;
use stevedore::infrastructure::{config::SettingsLoader, logging};
use stevedore::OrcEngine;

#[derive(Parser)]
#[command(name = "stevedore", about = "Container-orchestration control plane")]
struct Cli {
    /// Path to a config file; defaults to the merged host/env config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the refresh interval in seconds.
    #[arg(long)]
    refresh_interval: Option<u64>,

    /// Print the effective configuration as YAML and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => SettingsLoader::load_from_file(path)?,
        None => SettingsLoader::load()?,
    };
    if let Some(secs) = cli.refresh_interval {
        settings.engine.refresh_interval_secs = secs;
        SettingsLoader::validate(&settings)?;
    }
    if cli.print_config {
        print!("{}", serde_yaml::to_string(&settings)?);
        return Ok(());
    }
    logging::init(&settings.logging)?;

    let store: Arc<dyn Store> = match settings.store.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&settings.store.path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating store directory {}", parent.display()))?;
            }
            let url = format!("sqlite:{}", settings.store.path);
            Arc::new(SqliteStore::connect(&url).await.context("opening sqlite store")?)
        }
        other => bail!("unknown store backend {other:?}"),
    };

    let cluster: Arc<dyn Cluster> = match settings.cluster.backend.as_str() {
        "docker" => Arc::new(DockerCluster::new(&settings.cluster.endpoint)),
        "mock" => Arc::new(MockCluster::new(Vec::new())),
        other => bail!("unknown cluster backend {other:?}"),
    };

    let engine = OrcEngine::new(cluster, store, settings.engine_options())
        .await
        .context("building orc engine")?;
    engine.guard_goto_work().await;
    info!("engine running, ctrl-c stops it");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    engine.guard_goto_sleep().await;
    engine.stop();
    Ok(())
}
