//! Insights Server - Main Entry Point

use anyhow::Result;
use tracing::info;

use insights_server::{api, config, db, governance};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insights_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Insights Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Export drain + expiry sweep
    let maintenance = governance::spawn_maintenance_task(db_pool.clone(), config.exports.clone());
    info!(
        batch_size = config.exports.batch_size,
        drain_interval_secs = config.exports.drain_interval.as_secs(),
        sweep_interval_secs = config.exports.sweep_interval.as_secs(),
        "Export maintenance task started"
    );

    let state = api::AppState::new(db_pool, config.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    maintenance.abort();
    info!("Server shutdown complete");

    Ok(())
}
