//! Ingestion orchestration: configuration, the canonical store, the
//! reconciler and the single-flight coordinator with its scheduler.

use anyhow::{bail, Context, Result};

pub mod config;
pub mod coordinator;
pub mod reconcile;
pub mod store;

pub use config::{load_source_registry, SourceConfig, SourceRegistry, SyncConfig};
pub use coordinator::{
    IngestCoordinator, RunOutcome, RunReport, RunStatus, SourceReport, TriggerResponse,
};
pub use reconcile::{merge, EntityCounts, MergeOutcome, MergeStage, ReconcileError};
pub use store::{RunState, Store, StoreCounts, TeamStats, TeamSummary};

pub const CRATE_NAME: &str = "crease-sync";

/// Connects, migrates and seeds the store named by the config.
pub async fn open_store(config: &SyncConfig) -> Result<Store> {
    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;
    store.seed_sample_data().await?;
    Ok(store)
}

/// Store, registry and adapters wired together, with `last_update`
/// restored from run history.
pub async fn build_coordinator(config: &SyncConfig) -> Result<IngestCoordinator> {
    let store = open_store(config).await?;
    let registry = load_source_registry(&config.workspace_root).await?;
    let coordinator = IngestCoordinator::from_registry(
        store,
        &registry,
        &config.adapter_runtime(),
        config.stale_live_after,
    )?;
    coordinator
        .restore_last_update()
        .await
        .context("restoring last update")?;
    Ok(coordinator)
}

pub async fn run_sync_once_from_env() -> Result<RunReport> {
    let config = SyncConfig::from_env()?;
    let coordinator = build_coordinator(&config).await?;
    match coordinator.run_once().await {
        RunOutcome::Completed(report) => Ok(report),
        RunOutcome::Rejected => bail!("another ingestion run is already active"),
        RunOutcome::Failed { error, .. } => Err(error),
    }
}
