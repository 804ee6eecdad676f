//! Convoy - Main Entry Point
//! Priority dispatch + retention cleanup over the SQLite job history

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use convoy_core::application::{
    shutdown_channel, DispatchWorker, PriorityScheduler, RecoveryService,
    RetentionCleanupService,
};
use convoy_core::port::time_provider::SystemTimeProvider;
use convoy_core::port::{BroadcastNotifier, ConversionExecutor, TimeProvider};
use convoy_daemon::events::spawn_event_logger;
use convoy_daemon::DaemonConfig;
use convoy_infra_sqlite::{create_pool, run_migrations, SqliteJobHistory};
use convoy_infra_system::{CommandExecutor, CronTrigger, SystemProbeImpl, TokioFileStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() -> Result<()> {
    let log_format = std::env::var("CONVOY_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("convoy=info"))?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    init_logging()?;
    info!("Convoy v{} starting...", VERSION);

    // 2. Configuration
    let config = DaemonConfig::load()?;
    info!(db_path = %config.db_path, "Initializing database...");

    // 3. Database
    if !config.db_path.starts_with("sqlite:") {
        if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = create_pool(&config.database_url()).await?;
    run_migrations(&pool).await?;

    // 4. Wiring
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let history = Arc::new(SqliteJobHistory::new(pool.clone(), time_provider.clone()));
    let notifier = Arc::new(BroadcastNotifier::new(config.event_capacity));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let logger_handle = spawn_event_logger(notifier.subscribe(), shutdown_tx.subscribe());

    let scheduler = Arc::new(PriorityScheduler::new(
        config.scheduler,
        time_provider.clone(),
        notifier.clone(),
    ));
    scheduler.start_aging_tick();

    // 5. Requeue what the previous run left behind
    let recovery = RecoveryService::new(history.clone(), scheduler.clone(), time_provider.clone());
    match recovery.requeue_unfinished().await {
        Ok(count) => info!(requeued_jobs = count, "Recovery completed"),
        Err(e) => error!(error = %e, "Recovery failed"),
    }

    // 6. Dispatch workers
    let mut worker_handles = Vec::new();
    match &config.converter {
        Some(converter) => {
            let executor: Arc<dyn ConversionExecutor> =
                Arc::new(CommandExecutor::new(converter.clone(), time_provider.clone()));
            for index in 0..config.scheduler.concurrency.max(1) {
                let worker = DispatchWorker::new(
                    format!("worker-{}", index),
                    scheduler.clone(),
                    executor.clone(),
                    history.clone(),
                    time_provider.clone(),
                );
                let token = shutdown_rx.clone();
                worker_handles.push(tokio::spawn(async move {
                    if let Err(e) = worker.run(token).await {
                        error!(error = %e, "Worker failed");
                    }
                }));
            }
            info!(
                workers = worker_handles.len(),
                program = %converter.program,
                "Dispatch workers started"
            );
        }
        None => warn!("No converter configured; queued jobs will not be dispatched"),
    }

    // 7. Retention cleanup
    let cleanup = Arc::new(RetentionCleanupService::new(
        config.retention.clone(),
        history.clone(),
        Arc::new(TokioFileStore::new()),
        Arc::new(SystemProbeImpl::new()),
        Arc::new(CronTrigger::new()),
        notifier.clone(),
        time_provider.clone(),
    )?);
    if cleanup.start_schedule()? {
        let status = cleanup.get_statistics()?;
        info!(next_run_at = ?status.next_run_at, "Cleanup schedule active");
    }

    info!("System ready. Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown
    shutdown_tx.shutdown();
    cleanup.stop_schedule();
    scheduler.stop();
    for handle in worker_handles {
        if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await.is_err() {
            warn!("Worker did not stop in time");
        }
    }
    let _ = logger_handle.await;
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
