use podiumboard::orchestration::{LeaderboardService, RefreshCoordinator};
use podiumboard::{
    api, config::Config, db::init_db, BaselineMerger, BaselineSource, HttpMetadataEnricher,
    LedgerSource, MetadataEnricher, NoopMetadataEnricher, Repository, SnapshotStore,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let ledger: Arc<dyn LedgerSource> = Arc::new(Repository::new(pool.clone()));
    let store = Arc::new(SnapshotStore::with_batch_size(
        pool,
        config.snapshot_batch_size,
    ));
    let merger = Arc::new(BaselineMerger::new(BaselineSource::File(
        config.baseline_path.clone(),
    )));
    let enricher: Arc<dyn MetadataEnricher> = match &config.metadata_api_url {
        Some(url) => Arc::new(HttpMetadataEnricher::new(url.clone())),
        None => {
            tracing::info!("METADATA_API_URL not set, serving placeholder display names");
            Arc::new(NoopMetadataEnricher)
        }
    };

    let refresh = RefreshCoordinator::new(
        store,
        ledger,
        merger,
        config.snapshot_ttl,
        config.refresh_timeout,
    );
    let service = Arc::new(LeaderboardService::new(refresh, enricher));

    // Create router
    let app = api::create_router(api::AppState::new(service));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
