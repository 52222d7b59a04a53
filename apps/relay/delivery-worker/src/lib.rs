//! Delivery Worker Service
//!
//! Drains background jobs and the persisted email queue against PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//! background_jobs ──▶ JobProcessor (N workers) ──▶ send_email / schedule_campaign
//!                                                         │
//! email_queue ──▶ EmailQueueWorker (poll tick) ──▶ EmailRouter ──▶ Gmail API / Resend
//!                                                         │
//!                                  email_service_health ◀─┘
//! ```
//!
//! ## Features
//!
//! - Health-aware provider selection with reconnect flagging
//! - Durable retries for both jobs and queue rows
//! - Orphan recovery at boot for jobs and queue items left by a crashed process
//! - Graceful shutdown on SIGINT/SIGTERM
//! - `/health`, `/ready` and `/metrics` for Kubernetes health checks and Prometheus

pub mod db;
pub mod health;

use core_config::{database::DatabaseConfig, server::ServerConfig, Environment, FromEnv};
use domain_email::{
    register_email_jobs, EmailQueueWorker, EmailRouter, GmailConfig, GmailProvider, HealthTracker,
    PgEmailStore, ProviderSet, QueueWorkerConfig, ResendConfig, ResendProvider,
};
use eyre::{Result, WrapErr};
use health::{health_router, HealthState};
use job_worker::{JobProcessor, PgJobStore, ProcessorConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Serve the health and metrics endpoints until the process exits.
async fn start_health_server(state: HealthState, config: ServerConfig) -> Result<()> {
    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, health_router(state))
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the delivery worker
///
/// 1. Sets up error reports, structured logging and metrics
/// 2. Loads every component config from the environment
/// 3. Connects to PostgreSQL with retries
/// 4. Wires providers, health tracker, router and queue worker
/// 5. Starts the job pool and the queue poller, then waits for a signal
///
/// # Errors
///
/// Returns an error if a config is invalid, PostgreSQL is unreachable after
/// all retries, or the job processor refuses to start.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    job_worker::init_metrics();

    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    info!(name, version, ?environment, "Starting delivery worker");

    let server_config = ServerConfig::from_env().wrap_err("Failed to load server configuration")?;
    let db_config =
        DatabaseConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    let processor_config =
        ProcessorConfig::from_env().wrap_err("Failed to load job processor configuration")?;
    let queue_config =
        QueueWorkerConfig::from_env().wrap_err("Failed to load email queue configuration")?;
    let resend_config = ResendConfig::from_env().wrap_err("Failed to load Resend configuration")?;
    let gmail_config = GmailConfig::from_env().wrap_err("Failed to load Gmail configuration")?;

    info!("Connecting to PostgreSQL...");
    let db = db::connect_with_retry(&db_config)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    let store = Arc::new(PgEmailStore::new(db.clone()));
    let gmail = GmailProvider::new(gmail_config, store.clone()).wrap_err("Failed to build Gmail provider")?;
    let resend =
        ResendProvider::new(resend_config, store.clone()).wrap_err("Failed to build Resend provider")?;
    let providers = ProviderSet::new().with(Arc::new(gmail)).with(Arc::new(resend));
    let health = Arc::new(HealthTracker::new(store.clone()));
    let router = Arc::new(EmailRouter::new(health, providers, store.clone()));
    let queue_worker = Arc::new(EmailQueueWorker::new(store, router.clone(), queue_config));

    let workers = processor_config.workers;
    let mut processor = JobProcessor::new(processor_config, Arc::new(PgJobStore::new(db.clone())));
    register_email_jobs(&mut processor, router, queue_worker.clone());
    let processor = Arc::new(processor);

    let recovered = processor
        .recover_orphans()
        .await
        .wrap_err("Failed to recover orphaned jobs")?;
    if recovered > 0 {
        info!(recovered, "Re-offered jobs left by a previous process");
    }
    queue_worker
        .recover_stale(chrono::Utc::now())
        .await
        .wrap_err("Failed to recover stale email queue items")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(db, name, version);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, server_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    let handle = processor
        .start(workers, shutdown_rx.clone())
        .wrap_err("Failed to start job processor")?;

    info!(workers, "Delivery worker running");
    queue_worker.run(shutdown_rx).await;
    handle.join().await;

    info!("Delivery worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
