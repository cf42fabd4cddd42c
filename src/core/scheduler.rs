//! Per-monitor ticker tasks, staggered starts, hot reload, and graceful
//! shutdown.
//!
//! Grounded in the teacher's single-shot `HttpMonitor::probe` invoked from a
//! cron-like caller, generalized here into one long-running `tokio::spawn`
//! per monitor with its own interval timer, bounded by a global
//! [`tokio::sync::Semaphore`] for `max_concurrency` and gated by a
//! [`tokio_util::sync::CancellationToken`] for shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigWatcher, MonitorKey, MonitorSpec};
use crate::core::client_pool::ClientPool;
use crate::core::events::{EventDetector, Transition};
use crate::core::probe::HttpProber;
use crate::core::store::{ProbeRecord, Store};
use crate::logging;

/// Wall-clock seconds since the epoch. A thin wrapper so tests can inject a
/// fixed clock without pulling a mocking crate into the dependency set.
pub trait Clock: Send + Sync {
    fn now_s(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

struct MonitorTask {
    handle: JoinHandle<()>,
    spec: MonitorSpec,
}

/// Owns the running set of per-monitor tasks and the shared collaborators
/// they probe through. Constructed explicitly in `main.rs`; never a global
/// (only the logger is, per the design note in `logging`).
pub struct Scheduler {
    store: Arc<dyn Store>,
    client_pool: Arc<ClientPool>,
    events: Arc<Mutex<EventDetector>>,
    clock: Arc<dyn Clock>,
    concurrency: Arc<Semaphore>,
    cancellation: CancellationToken,
    default_interval: Duration,
    default_timeout: Duration,
    default_slow_latency: Option<Duration>,
    degraded_weight: f64,
    tasks: HashMap<MonitorKey, MonitorTask>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        client_pool: Arc<ClientPool>,
        events: Arc<Mutex<EventDetector>>,
        cancellation: CancellationToken,
    ) -> Self {
        let permits = if config.max_concurrency == 0 {
            config.monitors.len().max(1)
        } else {
            config.max_concurrency
        };
        Self {
            store,
            client_pool,
            events,
            clock: Arc::new(SystemClock),
            concurrency: Arc::new(Semaphore::new(permits)),
            cancellation,
            default_interval: config.interval,
            default_timeout: config.timeout,
            default_slow_latency: config.slow_latency,
            degraded_weight: config.degraded_weight,
            tasks: HashMap::new(),
        }
    }

    /// Spawns one ticker task per enabled monitor in `config`, with each
    /// task's first fire staggered across `[0, interval)` so that, for
    /// `N` monitors sharing an interval, probes don't all land in the same
    /// instant (§5: avoids bursting the concurrency semaphore and the
    /// remote APIs being probed).
    pub fn spawn_all(&mut self, config: &Config) {
        let enabled: Vec<&MonitorSpec> = config.monitors.iter().filter(|m| !m.disabled).collect();
        let count = enabled.len().max(1);

        for (index, monitor) in enabled.into_iter().enumerate() {
            let interval = monitor.interval.unwrap_or(self.default_interval);
            let stagger = if config.stagger_probes {
                interval.mul_f64(index as f64 / count as f64)
            } else {
                Duration::ZERO
            };
            self.spawn_one(monitor.clone(), interval, stagger);
        }
    }

    fn spawn_one(&mut self, monitor: MonitorSpec, interval: Duration, stagger: Duration) {
        let key = monitor.key();
        let store = self.store.clone();
        let client_pool = self.client_pool.clone();
        let events = self.events.clone();
        let clock = self.clock.clone();
        let concurrency = self.concurrency.clone();
        let cancellation = self.cancellation.clone();
        let default_timeout = self.default_timeout;
        let default_slow = self.default_slow_latency;
        let degraded_weight = self.degraded_weight;
        let spawned = monitor.clone();

        let handle = tokio::spawn(async move {
            let prober = HttpProber::new(client_pool);

            if !stagger.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(stagger) => {}
                    _ = cancellation.cancelled() => return,
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancellation.cancelled() => return,
                }

                let _permit = match concurrency.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                run_one_probe_isolated(
                    &prober,
                    &monitor,
                    default_timeout,
                    default_slow,
                    degraded_weight,
                    store.clone(),
                    events.clone(),
                    clock.clone(),
                )
                .await;
            }
        });

        self.tasks.insert(
            key,
            MonitorTask {
                handle,
                spec: spawned,
            },
        );
    }

    /// Diffs `new_config` against the currently running set: added monitors
    /// are spawned, removed/disabled monitors are aborted, and monitors
    /// whose spec changed (url, interval, headers, ...) are restarted from
    /// scratch. Deliberately never triggers an immediate probe for a
    /// restarted or newly-added monitor outside its own stagger offset —
    /// a reload is not a "run now" signal.
    pub fn reload(&mut self, new_config: &Config) {
        let new_keys: HashMap<MonitorKey, MonitorSpec> = new_config
            .monitors
            .iter()
            .filter(|m| !m.disabled)
            .map(|m| (m.key(), m.clone()))
            .collect();

        let removed: Vec<MonitorKey> = self
            .tasks
            .keys()
            .filter(|k| !new_keys.contains_key(*k))
            .cloned()
            .collect();
        for key in removed {
            if let Some(task) = self.tasks.remove(&key) {
                task.handle.abort();
                logging::get().scheduler("monitor_removed", &key.to_string());
            }
        }

        let changed: Vec<MonitorKey> = new_keys
            .iter()
            .filter(|(key, spec)| {
                self.tasks
                    .get(*key)
                    .map(|task| !monitor_spec_eq(&task.spec, spec))
                    .unwrap_or(true)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let count = new_keys.len().max(1);
        for (index, key) in changed.into_iter().enumerate() {
            if let Some(task) = self.tasks.remove(&key) {
                task.handle.abort();
            }
            let spec = new_keys.get(&key).expect("key came from new_keys").clone();
            let interval = spec.interval.unwrap_or(new_config.interval);
            let stagger = if new_config.stagger_probes {
                interval.mul_f64(index as f64 / count as f64)
            } else {
                Duration::ZERO
            };
            logging::get().scheduler("monitor_reloaded", &key.to_string());
            self.spawn_one(spec, interval, stagger);
        }
    }

    /// Cancels every task and drains the client pool. Awaiting the join
    /// handles bounds shutdown to however long an in-flight probe takes to
    /// hit its own timeout.
    /// Number of monitors currently scheduled. Exposed for tests asserting
    /// that a reload neither duplicates nor drops tasks (§8 scenario 6).
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn shutdown(mut self) {
        self.cancellation.cancel();
        for (_, task) in self.tasks.drain() {
            let _ = task.handle.await;
        }
        self.client_pool.shutdown().await;
    }
}

fn monitor_spec_eq(a: &MonitorSpec, b: &MonitorSpec) -> bool {
    a.url == b.url
        && a.method == b.method
        && a.headers == b.headers
        && a.body == b.body
        && a.success_contains == b.success_contains
        && a.slow_latency == b.slow_latency
        && a.timeout == b.timeout
        && a.proxy_url == b.proxy_url
        && a.interval == b.interval
}

/// Runs one probe iteration on its own `tokio::spawn` boundary so a panic
/// inside probing, classification, or storage never takes down the
/// monitor's own ticker loop — let alone any other monitor's. Per §7, a
/// probe-task panic is recovered, counted, and logged; the ticker simply
/// waits for its next tick.
async fn run_one_probe_isolated(
    prober: &HttpProber,
    monitor: &MonitorSpec,
    default_timeout: Duration,
    default_slow: Option<Duration>,
    degraded_weight: f64,
    store: Arc<dyn Store>,
    events: Arc<Mutex<EventDetector>>,
    clock: Arc<dyn Clock>,
) {
    let prober = prober.clone();
    let monitor = monitor.clone();

    let handle = tokio::spawn(async move {
        run_one_probe(
            &prober,
            &monitor,
            default_timeout,
            default_slow,
            degraded_weight,
            store.as_ref(),
            &events,
            clock.as_ref(),
        )
        .await;
    });

    if let Err(err) = handle.await {
        if err.is_panic() {
            logging::get().scheduler("probe_task_panicked", &err.to_string());
        }
    }
}

async fn run_one_probe(
    prober: &HttpProber,
    monitor: &MonitorSpec,
    default_timeout: Duration,
    default_slow: Option<Duration>,
    degraded_weight: f64,
    store: &dyn Store,
    events: &Arc<Mutex<EventDetector>>,
    clock: &dyn Clock,
) {
    let key = monitor.key();
    let result = prober.probe(monitor, default_timeout, default_slow).await;
    let timestamp_s = clock.now_s();

    if let Err(err) = store.save_record(ProbeRecord::new(&key, &result, timestamp_s)).await {
        logging::get().store("save_record_failed", &format!("{key}: {err}"));
        return;
    }
    let _ = degraded_weight; // consumed at query time, not at write time

    let transition = {
        let mut detector = events.lock().await;
        detector.observe(&key, &result, timestamp_s)
    };

    match transition {
        Some(Transition::Opened(event)) => match store.append_event(&event).await {
            Ok(id) => {
                events.lock().await.record_event_id(&key, id);
                logging::get().events("event_opened", &format!("{key} kind={:?} id={id}", event.kind));
            }
            Err(err) => logging::get().events("append_event_failed", &format!("{key}: {err}")),
        },
        Some(Transition::Closed { event_id: Some(id), closed_at }) => {
            if let Err(err) = store.close_event(id, closed_at).await {
                logging::get().events("close_event_failed", &format!("{key}: {err}"));
            } else {
                logging::get().events("event_closed", &format!("{key} id={id}"));
            }
        }
        Some(Transition::Closed { event_id: None, closed_at }) => {
            logging::get().events(
                "close_without_tracked_id",
                &format!("{key} closed_at={closed_at} (no open event id tracked)"),
            );
        }
        None => {}
    }
}

/// Polls `watcher` for config changes and applies them to `scheduler`. Run
/// as its own spawned task, or inline in a loop if the caller prefers.
pub async fn watch_for_reload(
    mut watcher: ConfigWatcher,
    scheduler: Arc<Mutex<Scheduler>>,
    cancellation: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancellation.cancelled() => return,
        }

        match watcher.poll() {
            Some(Ok(new_config)) => {
                scheduler.lock().await.reload(&new_config);
            }
            Some(Err(err)) => {
                logging::get().scheduler("reload_failed", &err.to_string());
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventsConfig, StorageConfig, StorageKind};
    use std::collections::HashMap as StdHashMap;

    fn base_monitor(interval_secs: Option<u64>) -> MonitorSpec {
        MonitorSpec {
            provider: "anthropic".into(),
            service: "messages".into(),
            channel: None,
            method: "POST".into(),
            url: "https://api.anthropic.com/v1/messages".into(),
            headers: StdHashMap::new(),
            body: String::new(),
            success_contains: "content".into(),
            slow_latency: None,
            timeout: None,
            disabled: false,
            proxy_url: None,
            interval: interval_secs.map(Duration::from_secs),
            category: None,
            sponsor: None,
            sponsor_url: None,
            provider_url: None,
            board: None,
            badges: vec![],
        }
    }

    fn base_config() -> Config {
        Config {
            interval: Duration::from_secs(60),
            slow_latency: None,
            timeout: Duration::from_secs(30),
            max_concurrency: 4,
            stagger_probes: true,
            degraded_weight: 0.5,
            storage: StorageConfig {
                kind: StorageKind::Sqlite,
                dsn: "sqlite::memory:".into(),
            },
            events: EventsConfig::default(),
            monitors: vec![base_monitor(None)],
        }
    }

    #[test]
    fn monitor_spec_eq_detects_url_change() {
        let a = base_monitor(None);
        let mut b = base_monitor(None);
        assert!(monitor_spec_eq(&a, &b));
        b.url = "https://other.example/v1".into();
        assert!(!monitor_spec_eq(&a, &b));
    }

    #[tokio::test]
    async fn reload_with_identical_config_spawns_no_new_tasks() {
        use crate::core::store::sqlite::SqliteStore;

        let config = base_config();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let client_pool = Arc::new(ClientPool::new());
        let events = Arc::new(Mutex::new(EventDetector::new(
            config.events.down_threshold,
            config.events.up_threshold,
        )));
        let cancellation = CancellationToken::new();

        let mut scheduler = Scheduler::new(&config, store, client_pool, events, cancellation.clone());
        scheduler.spawn_all(&config);
        assert_eq!(scheduler.tasks.len(), 1);

        scheduler.reload(&config);
        assert_eq!(scheduler.tasks.len(), 1);

        scheduler.shutdown().await;
    }
}
