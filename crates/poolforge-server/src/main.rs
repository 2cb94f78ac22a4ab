//! Poolforge Server Binary
//!
//! Runs the Job API and the deployment worker pool.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use poolforge_core::WorkProver;
use poolforge_server::{
    create_router, AppState, GenesisSlotClock, HttpManifestRefresher, JobQueue, JobService,
    KeyRegistry, ManifestRefresher, MemoryQueue, MemoryStore, NoopRefresher, ServerConfig,
    SetupCache, Store, WorkerPool,
};

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env().expect("Invalid configuration");

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Initialize key registry
    let registry = match &config.authorizer_keys {
        Some(entries) => KeyRegistry::from_config(entries).expect("Invalid POOLFORGE_AUTHORIZER_KEYS"),
        None => {
            warn!("No authorizer keys configured; deployments will fail until keys are loaded");
            KeyRegistry::new()
        }
    };

    // Initialize storage and queue
    let (store, queue) = open_backends(&config).await;

    let refresher: Arc<dyn ManifestRefresher> = match &config.cdn_url {
        Some(url) => Arc::new(HttpManifestRefresher::new(url.clone())),
        None => Arc::new(NoopRefresher),
    };

    let service = Arc::new(JobService::new(
        store,
        queue,
        Arc::new(registry),
        Arc::new(GenesisSlotClock::default()),
        refresher,
    ));
    let setup = Arc::new(SetupCache::new(Arc::new(WorkProver::new(
        config.attestation_rounds,
    ))));

    let pool = WorkerPool::start(service.worker(setup.clone()), config.workers);

    info!(
        port = config.port,
        workers = pool.slots(),
        held_keys = service.registry().key_count(),
        "Starting deployment server"
    );
    if config.admin_token.is_none() {
        warn!("POOLFORGE_ADMIN_TOKEN is not set, signer administration is disabled");
    }

    // Create application state
    let state = Arc::new(AppState {
        service,
        setup,
        workers: pool.slots(),
        admin_token: config.admin_token.clone(),
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "Deployment server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .expect("Server error");

    pool.shutdown().await;
}

#[cfg(feature = "postgres")]
async fn open_backends(config: &ServerConfig) -> (Arc<dyn Store>, Arc<dyn JobQueue>) {
    use poolforge_server::queue::PostgresQueue;
    use poolforge_server::storage::PostgresStore;

    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::new(url)
                .await
                .expect("Failed to connect to database");
            let queue = PostgresQueue::new(store.pool().clone())
                .await
                .expect("Failed to prepare job queue");
            info!("Using PostgreSQL storage");
            (Arc::new(store), Arc::new(queue))
        }
        None => memory_backends(),
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_backends(config: &ServerConfig) -> (Arc<dyn Store>, Arc<dyn JobQueue>) {
    if config.database_url.is_some() {
        warn!("POOLFORGE_DATABASE_URL is set but the postgres feature is disabled");
    }
    memory_backends()
}

fn memory_backends() -> (Arc<dyn Store>, Arc<dyn JobQueue>) {
    info!("Using in-memory storage");
    (Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()))
}
