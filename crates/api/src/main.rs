use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ride_dispatch_api::{app, config, jobs, middleware};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(config::Config::load()?);

    // Initialize logging
    middleware::logging::init_logging(&config.logging);

    // Initialize Prometheus metrics
    middleware::metrics::init_metrics();

    info!("Starting Ride Dispatch API v{}", env!("CARGO_PKG_VERSION"));

    // Create database pool
    let db_config = persistence::db::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connect_timeout_secs: config.database.connect_timeout_secs,
        idle_timeout_secs: config.database.idle_timeout_secs,
    };
    let pool = persistence::db::create_pool(&db_config).await?;

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    // Wire the dispatch core
    let state = app::AppState::build(Arc::clone(&config), pool.clone());

    // Start background jobs: the offer sweeper is the correctness net
    // behind the per-offer timers.
    let mut scheduler = jobs::JobScheduler::new();
    scheduler.register(jobs::OfferSweeperJob::new(
        pool.clone(),
        Arc::clone(&state.matcher),
        config.dispatch.offer_timeout_s,
        config.dispatch.sweeper_interval_s,
    ));
    scheduler.register(jobs::PresenceSweepJob::new(Arc::clone(&state.presence)));
    scheduler.register(jobs::CleanupRidesJob::new(
        pool.clone(),
        config.limits.ride_retention_days,
    ));
    scheduler.register(jobs::PoolMetricsJob::new(pool.clone()));
    scheduler.start();

    // Build application
    let addr = config.socket_addr();
    let router = app::create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Handle shutdown gracefully
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Shutdown job scheduler
    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(30)).await;

    info!("Server shutdown complete");
    Ok(())
}
