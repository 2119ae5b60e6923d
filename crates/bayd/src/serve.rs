//! Serve mode: opens the state store, connects the stack service, and
//! runs the reconciler until ctrl-c.

use std::sync::Arc;

use bay_conductor::{Conductor, Reconciler};
use bay_core::{ConductorConfig, parse_duration};
use bay_stack::{HeatClient, MemoryStackService, StackService};
use bay_state::StateStore;
use tracing::{info, warn};

use crate::Backend;

pub async fn run(config: ConductorConfig, backend: Backend, interval: Option<String>) -> anyhow::Result<()> {
    info!("baygrid conductor starting");

    // ── State store ──────────────────────────────────────────────
    let db_path = config.database.path.clone();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Stack service ────────────────────────────────────────────
    let stacks: Arc<dyn StackService> = match backend {
        Backend::Heat => {
            let client = HeatClient::from_config(&config);
            info!(endpoint = %client.endpoint(), "using heat stack service");
            Arc::new(client)
        }
        Backend::Memory => {
            warn!("using in-memory stack service; nothing is provisioned");
            Arc::new(MemoryStackService::auto_completing())
        }
    };

    // ── Reconciler ───────────────────────────────────────────────
    let interval = match interval {
        Some(raw) => parse_duration(&raw)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| anyhow::anyhow!("invalid --interval {raw:?}"))?,
        None => config.periodic_interval(),
    };
    let config = Arc::new(config);
    let conductor = Conductor::new(store, stacks, config);
    let reconciler = Arc::new(Reconciler::with_interval(conductor, interval));
    let handle = reconciler.clone().start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    reconciler.shutdown();
    handle.await?;
    info!("baygrid conductor stopped");
    Ok(())
}
