//! Queue worker entry point.
//!
//! Drains the provisioning queue into the downstream service. Runs until
//! Ctrl-C, or performs a single pass (plus its idle backoff) when
//! `WORKER_ONESHOT=true` so an external scheduler can drive it.

use std::sync::Arc;

use gumjabi::{
    config::WorkerConfig,
    db,
    services::{
        provisioner::HttpProvisioner,
        queue_worker::{Backoff, QueueWorker, WorkerSettings},
    },
    store::postgres::PgWorkQueue,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    gumjabi::init_tracing(config.verbose);

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&pool).await?;

    let queue = Arc::new(PgWorkQueue::new(pool));
    db::prepare_queue(queue.as_ref()).await?;

    let provisioner = HttpProvisioner::new(
        &config.provision_url,
        config.provision_secret.clone(),
        config.provision_timeout(),
    )?;

    let settings = WorkerSettings {
        batch_size: config.worker_batch_size.max(1),
        max_attempts: config.worker_max_attempts.max(1),
        lease: config.lease(),
        backoff: Backoff::new(config.worker_backoff_min_secs, config.worker_backoff_max_secs),
    };
    let worker = QueueWorker::new(queue, Arc::new(provisioner), settings);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Could not listen for shutdown signal"),
        }
    });

    if config.worker_oneshot {
        let outcome = worker.poll(&shutdown).await;
        tracing::info!(?outcome, "Single pass finished");
    } else {
        worker.run(shutdown).await;
    }

    Ok(())
}
