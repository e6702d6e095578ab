//! Gumjabi ingestion server - main application entry point.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations and ensure queue indices
//! 4. Build HTTP router with routes and middleware
//! 5. Serve until Ctrl-C

use std::{net::SocketAddr, sync::Arc};

use gumjabi::{
    app::{self, AppState},
    config::Config,
    db,
    services::ingest_service::NameDefaults,
    store::postgres::{PgKeyStore, PgWorkQueue},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    gumjabi::init_tracing(config.verbose);
    tracing::info!(restrict_hosts = config.restrict_hosts, "Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let keys = Arc::new(PgKeyStore::new(pool.clone()));
    let queue = Arc::new(PgWorkQueue::new(pool));
    db::prepare_queue(queue.as_ref()).await?;

    let state = AppState::new(
        keys,
        queue,
        config.restrict_hosts,
        NameDefaults {
            first_name: config.default_first_name.clone(),
            last_name: config.default_last_name.clone(),
        },
    );
    let app = app::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connect info supplies the caller address for host restriction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
