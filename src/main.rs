use std::sync::Arc;

use anyhow::{Context, Result};
use dota_ingest::api::{ApiServer, AppState};
use dota_ingest::config::{IngestConfig, LOGGED_KEYS};
use dota_ingest::database_ops::db::Db;
use dota_ingest::ingest::{ScheduleSettings, Scheduler};
use dota_ingest::util::{env as env_util, logging};
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // --- env + logging -------------------------------------------------------
    env_util::init_env();
    logging::init_tracing(logging::DEFAULT_FILTER)?;
    env_util::preflight_check("dota-ingest", &["STEAM_API_KEY", "DATABASE_URL"], LOGGED_KEYS)?;
    let cfg = IngestConfig::from_env()?;

    // --- DB connect (migrates only when AUTO_MIGRATE is on) ------------------
    let database_url = env_util::db_url()?;
    let db = Db::connect(&database_url, cfg.db_max_conns)
        .await
        .context("Db::connect failed")?;

    let store = Arc::new(db.clone());
    let ingestor = Arc::new(dota_ingest::build_ingestor(&cfg, store.clone())?);
    let schedule: ScheduleSettings = cfg.schedule_settings();
    info!(
        interval_secs = schedule.interval.as_secs(),
        recent_limit = schedule.recent_limit,
        concurrency = schedule.concurrency,
        rps = cfg.requests_per_second,
        "service configured"
    );

    // --- shutdown wiring -----------------------------------------------------
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let scheduler = Scheduler::new(ingestor.clone(), store, schedule);
    let scheduler_rx = shutdown_tx.subscribe();
    let scheduler_task = tokio::spawn(async move { scheduler.run_forever(scheduler_rx).await });

    let server = ApiServer::new(cfg.api_host.clone(), cfg.api_port);
    let state = AppState::new(ingestor, Some(db));

    info!("service started; press Ctrl+C to stop");
    tokio::select! {
        res = server.run(state) => {
            if let Err(err) = res {
                error!(error = %format!("{err:#}"), "admin API stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown: Ctrl+C received");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(err) = scheduler_task.await {
        error!(error = %err, "scheduler task join error");
    }
    info!("all tasks stopped; goodbye");
    Ok(())
}
