use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use timeline::api::{start_server, AppState, ServerConfig};
use timeline::contracts::Sequencer;
use timeline::metrics::SequencerMetrics;
use timeline::sequencer::{
    env_flag, CollectionLocks, OrdinalSequencer, SequencerConfig, DEFAULT_COLLECTION,
};
use timeline::storage::RocksDbRecordStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("timeline=info".parse()?))
        .init();

    tracing::info!("Timeline starting...");

    let data_dir = std::env::var("TIMELINE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let store = Arc::new(RocksDbRecordStore::open(&data_dir)?);
    tracing::info!("Opened RocksDB at {}", data_dir);

    let collection =
        std::env::var("TIMELINE_COLLECTION").unwrap_or_else(|_| DEFAULT_COLLECTION.into());
    let config = SequencerConfig::from_env();
    tracing::info!(
        collection = %collection,
        heal_after_move = config.heal_after_move,
        repair_on_failure = config.repair_on_failure,
        "Sequencer configured"
    );

    let metrics = Arc::new(SequencerMetrics::new());
    let locks = CollectionLocks::new();
    let sequencer = Arc::new(
        OrdinalSequencer::with_locks(store, collection, &locks, config)
            .with_metrics(Arc::clone(&metrics)),
    );

    if let Some(violation) = sequencer.verify().await? {
        if env_flag("TIMELINE_REPAIR_ON_START").unwrap_or(false) {
            let changed = sequencer.renumber_all().await?;
            tracing::warn!(%violation, changed, "Repaired ordering on startup");
        } else {
            tracing::warn!(
                %violation,
                "Stored ordering is not dense, POST /timeline/reorder or set TIMELINE_REPAIR_ON_START=1"
            );
        }
    }

    let state = Arc::new(AppState::new(sequencer, metrics));

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    };

    start_server(ServerConfig::from_env(), state, shutdown).await?;

    tracing::info!("Timeline stopped");
    Ok(())
}
