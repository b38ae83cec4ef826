//! `topom` server binary.
//!
//! Loads the config file (if any), overlays flags, opens the snapshot store,
//! starts the background drivers and serves the admin API until ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use topom_server::clients::network_clients;
use topom_server::network::{AppState, NetworkModule};
use topom_server::service::{Drivers, TopomConfig};
use topom_server::storage::{MemorySnapshotStore, SnapshotStore};
use topom_server::Topom;

#[derive(Parser, Debug)]
#[command(name = "topom", about = "Cluster topology manager")]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long, env = "TOPOM_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "TOPOM_PRODUCT_NAME")]
    product_name: Option<String>,
    #[arg(long, env = "TOPOM_PRODUCT_AUTH", hide_env_values = true)]
    product_auth: Option<String>,
    /// Admin API listen address, e.g. `0.0.0.0:18080`.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Directory of the snapshot file; omit to keep topology in memory.
    #[arg(long, env = "TOPOM_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
    #[arg(long, env = "TOPOM_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<TopomConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                TopomConfig::from_json(&text)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => TopomConfig::default(),
        };
        if let Some(name) = &self.product_name {
            config.cluster.product_name.clone_from(name);
        }
        if let Some(auth) = &self.product_auth {
            config.cluster.product_auth.clone_from(auth);
        }
        if let Some(addr) = self.listen {
            config.network.host = addr.ip().to_string();
            config.network.port = addr.port();
        }
        if self.data_dir.is_some() {
            config.data_dir.clone_from(&self.data_dir);
        }
        if self.metrics_addr.is_some() {
            config.metrics_addr = self.metrics_addr;
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_persistence(config: &TopomConfig) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    match &config.data_dir {
        #[cfg(feature = "redb")]
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create data dir {}", dir.display()))?;
            let path = dir.join("topom.redb");
            info!(path = %path.display(), "using redb snapshot store");
            Ok(Arc::new(topom_server::storage::RedbSnapshotStore::open(path)?))
        }
        #[cfg(not(feature = "redb"))]
        Some(_) => anyhow::bail!("data_dir requires the `redb` feature"),
        None => {
            info!("using in-memory snapshot store");
            Ok(Arc::new(MemorySnapshotStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = cli.load_config()?;

    if let Some(addr) = config.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let clients = network_clients(&config.cluster)?;
    let persistence = open_persistence(&config)?;
    let topom = Arc::new(Topom::open(config.cluster.clone(), persistence, clients).await?);
    info!(
        product_name = %config.cluster.product_name,
        version = topom.version(),
        "topology loaded"
    );

    let mut drivers = Drivers::start(&topom, &config);
    drivers.refresh_stats();

    let mut module = NetworkModule::new(config.network.clone());
    let port = module.start().await?;
    info!(host = %config.network.host, port, "admin api listening");

    let state = AppState::new(
        Arc::clone(&topom),
        &config,
        drivers.kicker(),
        module.shutdown_controller(),
    );
    let result = module
        .serve(state, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl-c handler failed");
            }
        })
        .await;

    drivers.stop().await;
    topom.close();
    info!("topom stopped");
    result
}
