//! RAGKB API server - Main entry point

use anyhow::Result;
use ragkb_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

use ragkb_server::{
    api,
    config::Config,
    db,
    documents::PgDocumentRepository,
    features::FeatureState,
    queue::{PgJobQueue, QueueConfig},
    shutdown,
    storage::{self, StorageConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::from_env("ragkb-server")?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting RAGKB API server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    let storage_config = StorageConfig::from_env()?;
    let store = storage::from_config(&storage_config).await?;

    let queue_config = QueueConfig::from_env()?;
    let queue_pool = db::create_queue_pool(&config.database, &queue_config, &db_pool).await?;

    let state = FeatureState {
        db: db_pool.clone(),
        queue_db: queue_pool.clone(),
        documents: Arc::new(PgDocumentRepository::new(db_pool)),
        store,
        queue: Arc::new(PgJobQueue::new(queue_pool)),
        bucket: storage_config.bucket.clone(),
        queue_name: queue_config.queue_name.clone(),
        max_attempts: queue_config.max_attempts,
    };

    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
