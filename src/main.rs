use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use relaypulse::cli::Cli;
use relaypulse::config::{Config, ConfigWatcher};
use relaypulse::core::query::QueryEngine;
use relaypulse::core::scheduler::{self, Scheduler};
use relaypulse::core::store::postgres::PostgresStore;
use relaypulse::core::store::sqlite::SqliteStore;
use relaypulse::core::store::{Store, RECORD_RETENTION};
use relaypulse::core::events::Transition;
use relaypulse::core::{ClientPool, EventDetector};
use relaypulse::config::StorageKind;
use relaypulse::{logging, RelayError};

const RELOAD_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_args();
    logging::init(logging::LoggerConfig::default());

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            logging::get().error("Main", "fatal", &err.to_string());
            eprintln!("relaypulse: {err}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> relaypulse::Result<i32> {
    let config = Config::load_from_path(&cli.config)?;

    if cli.validate_config {
        print_validation_summary(&config);
        return Ok(0);
    }

    let store = open_store(&config).await?;
    backfill_channels(store.as_ref(), &config).await;

    if cli.once {
        run_all_once(&config, store).await;
        return Ok(0);
    }

    run_daemon(cli.config, config, store).await?;
    Ok(0)
}

async fn open_store(config: &Config) -> relaypulse::Result<Arc<dyn Store>> {
    match config.storage.kind {
        StorageKind::Sqlite => Ok(Arc::new(SqliteStore::connect(&config.storage.dsn).await?)),
        StorageKind::Postgres => Ok(Arc::new(PostgresStore::connect(&config.storage.dsn).await?)),
    }
}

/// Backfills legacy NULL/empty `channel` rows from the mapping derived from
/// the current config (first non-empty channel per `(provider, service)`),
/// per §6. Idempotent, so it is safe to run on every startup and reload.
async fn backfill_channels(store: &dyn Store, config: &Config) {
    use std::collections::HashMap;

    let mut mappings: HashMap<(String, String), String> = HashMap::new();
    for monitor in &config.monitors {
        mappings
            .entry((monitor.provider.clone(), monitor.service.clone()))
            .or_insert_with(|| monitor.key().channel);
    }
    let mappings: Vec<(String, String, String)> = mappings
        .into_iter()
        .map(|((provider, service), channel)| (provider, service, channel))
        .collect();

    if let Err(err) = store.migrate_channel_data(&mappings).await {
        logging::get().store("channel_backfill_failed", &err.to_string());
    }
}

fn print_validation_summary(config: &Config) {
    println!("config OK: {} monitor(s)", config.monitors.len());
    for monitor in QueryEngine::list_monitors(config) {
        println!(
            "  {} {}",
            monitor.key,
            if monitor.disabled { "(disabled)" } else { "" }
        );
    }
}

/// `--once`: probe every enabled monitor exactly one time, sequentially,
/// and exit. Useful for validating a config against live endpoints without
/// waiting for the scheduler's first staggered tick.
async fn run_all_once(config: &Config, store: Arc<dyn Store>) {
    let client_pool = Arc::new(ClientPool::new());
    let prober = relaypulse::core::probe::HttpProber::new(client_pool.clone());
    let mut events = EventDetector::new(config.events.down_threshold, config.events.up_threshold);

    for monitor in config.monitors.iter().filter(|m| !m.disabled) {
        let result = prober.probe(monitor, config.timeout, config.slow_latency).await;
        let timestamp_s = chrono::Utc::now().timestamp();
        let key = monitor.key();
        println!(
            "{key} status={:?} sub_status={:?} latency={}ms",
            result.status, result.sub_status, result.latency_ms
        );

        let record = relaypulse::core::store::ProbeRecord::new(&key, &result, timestamp_s);
        if let Err(err) = store.save_record(record).await {
            logging::get().store("save_record_failed", &format!("{key}: {err}"));
            continue;
        }
        match events.observe(&key, &result, timestamp_s) {
            Some(Transition::Opened(event)) => {
                if let Ok(id) = store.append_event(&event).await {
                    events.record_event_id(&key, id);
                }
            }
            Some(Transition::Closed { event_id: Some(id), closed_at }) => {
                let _ = store.close_event(id, closed_at).await;
            }
            Some(Transition::Closed { event_id: None, .. }) | None => {}
        }
    }

    client_pool.shutdown().await;
}

/// Runs the scheduler loop until a shutdown signal (SIGINT/ctrl-c) arrives,
/// polling the config file for hot-reloadable changes in the background.
async fn run_daemon(
    config_path: std::path::PathBuf,
    config: Config,
    store: Arc<dyn Store>,
) -> relaypulse::Result<()> {
    let client_pool = Arc::new(ClientPool::new());
    let events = Arc::new(Mutex::new(EventDetector::new(
        config.events.down_threshold,
        config.events.up_threshold,
    )));
    let cancellation = CancellationToken::new();

    let mut scheduler = Scheduler::new(
        &config,
        store.clone(),
        client_pool.clone(),
        events,
        cancellation.clone(),
    );
    scheduler.spawn_all(&config);

    let scheduler = Arc::new(Mutex::new(scheduler));
    let watcher = ConfigWatcher::new(config_path);
    let reload_task = tokio::spawn(scheduler::watch_for_reload(
        watcher,
        scheduler.clone(),
        cancellation.clone(),
        RELOAD_POLL_INTERVAL,
    ));
    let retention_task = tokio::spawn(run_retention_sweeps(store.clone(), cancellation.clone()));

    logging::get().scheduler("started", &format!("{} monitor(s)", config.monitors.len()));

    wait_for_shutdown_signal().await;
    logging::get().scheduler("shutdown_signal_received", "");

    cancellation.cancel();
    reload_task.abort();
    retention_task.abort();
    // Wait for the aborted tasks to actually unwind so their `Arc` clones
    // are dropped before we try to reclaim sole ownership below.
    let _ = reload_task.await;
    let _ = retention_task.await;

    let scheduler = Arc::try_unwrap(scheduler)
        .map_err(|_| RelayError::TaskJoin("scheduler still has outstanding references at shutdown".into()))?
        .into_inner();

    let shutdown = scheduler.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, shutdown).await.is_err() {
        logging::get().scheduler("shutdown_grace_period_exceeded", "");
    }

    Ok(())
}

/// Periodically purges `ProbeRecord`s older than [`RECORD_RETENTION`] — the
/// TTL sweep named in §3, run independently of probing and reload so a slow
/// sweep never blocks either.
async fn run_retention_sweeps(store: Arc<dyn Store>, cancellation: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {}
            _ = cancellation.cancelled() => return,
        }

        let cutoff = chrono::Utc::now().timestamp() - RECORD_RETENTION.as_secs() as i64;
        match store.purge_expired_records(cutoff).await {
            Ok(purged) if purged > 0 => {
                logging::get().store("retention_sweep", &format!("purged {purged} expired record(s)"));
            }
            Ok(_) => {}
            Err(err) => logging::get().store("retention_sweep_failed", &err.to_string()),
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
