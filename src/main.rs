use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use workspace_api::{
    api::{create_router, AppState},
    config::Config,
    db::create_pool,
    observability::{init_tracing, HealthChecker},
    rate_limit::{DistributedCounterStore, InMemoryStore, RateLimitState, RateLimiter, RedisCounterStore},
    workspace::PgWorkspaceFlags,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting Workspace API service");
    tracing::info!("Configuration loaded: {:?}", config.server);

    // Create database connection pool
    let db_pool = create_pool(&config.database).await?;
    tracing::info!("Database connection pool created");

    // Construct the distributed counter store only when Redis is configured;
    // the connection itself is established in the background.
    let redis_store = match &config.redis {
        Some(redis_config) => Some(RedisCounterStore::connect(redis_config)),
        None => {
            tracing::info!("Redis not configured, rate limiting uses the in-memory store");
            None
        }
    };

    // Assemble the rate limiter at the composition root
    let memory_store = InMemoryStore::new(
        config.rate_limit.memory_capacity,
        Duration::from_secs(config.rate_limit.memory_entry_ttl_seconds),
    );
    let limiter = Arc::new(RateLimiter::new(
        memory_store,
        redis_store
            .clone()
            .map(|store| store as Arc<dyn DistributedCounterStore>),
    ));
    let rate_limit_state = RateLimitState {
        limiter,
        workspace_flags: Arc::new(PgWorkspaceFlags::new(db_pool.clone())),
    };

    let health_checker = Arc::new(HealthChecker::new(db_pool, redis_store.clone()));

    // Create router
    let app = create_router(AppState {
        rate_limit: rate_limit_state,
        health_checker,
    });

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tracing::info!("Workspace API service is ready to accept requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    if let Some(store) = redis_store {
        store.close();
    }
    tracing::info!("Workspace API service stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
