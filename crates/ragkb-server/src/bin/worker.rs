// Ingestion worker
//
// Runs the bounded worker pool over the `ingest_jobs` queue plus the periodic
// reconciliation sweep. Any number of these processes may run side by side.
//
// Usage:
//   cargo run --bin ragkb-worker

use anyhow::Result;
use ragkb_common::logging::{init_logging, LogConfig};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ragkb_server::{
    config::Config,
    db,
    documents::{DocumentRepository, PgDocumentRepository},
    ingest::{IngestConfig, IngestionPipeline, PgTableStore, Reconciler, StrategyRegistry},
    queue::{JobQueue, PgJobQueue, QueueConfig, WorkerPool, WorkerPoolConfig},
    shutdown,
    storage::{self, StorageConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::from_env("ragkb-worker")?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting RAGKB ingestion worker");

    let config = Config::load()?;
    let ingest_config = IngestConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;
    let queue_pool = db::create_queue_pool(&config.database, &queue_config, &db_pool).await?;

    let storage_config = StorageConfig::from_env()?;
    let store = storage::from_config(&storage_config).await?;

    let documents: Arc<dyn DocumentRepository> = Arc::new(PgDocumentRepository::new(db_pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(queue_pool));
    let tables = Arc::new(PgTableStore::new(db_pool));

    let strategies = StrategyRegistry::standard(store.clone(), tables, &ingest_config);
    let pipeline = Arc::new(
        IngestionPipeline::new(store, documents.clone(), strategies)
            .with_max_object_bytes(ingest_config.max_object_bytes),
    );

    let pool_config = WorkerPoolConfig::from_queue_config(
        &queue_config,
        ingest_config.worker_concurrency,
        ingest_config.job_timeout(),
    );
    let pool = Arc::new(WorkerPool::new(queue.clone(), pool_config).register(pipeline));
    info!(worker_id = %pool.worker_id(), "Worker pool configured");

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(pool.run(cancel.clone()));

    if ingest_config.reconcile.enabled {
        let reconciler = Reconciler::new(
            documents,
            queue,
            ingest_config.reconcile.clone(),
            queue_config.queue_name.clone(),
            queue_config.max_attempts,
        );
        let token = cancel.clone();
        tasks.spawn(async move { reconciler.run(token).await });
    } else {
        info!("Reconciliation disabled (RECONCILE_ENABLED=false)");
    }

    shutdown::signal().await;
    cancel.cancel();

    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    let drained = tokio::time::timeout(drain, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(timeout_secs = drain.as_secs(), "Shutdown timed out with jobs still in flight");
    }

    info!("Worker shutdown complete");

    Ok(())
}
