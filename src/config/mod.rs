//! YAML configuration: parsing, defaults, env-var credential substitution,
//! and a polling file-watcher for hot reload.

pub mod monitor;

pub use monitor::{MonitorKey, MonitorSpec};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_degraded_weight() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_down_threshold() -> u32 {
    3
}

fn default_up_threshold() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type", default = "default_storage_type")]
    pub kind: StorageKind,
    pub dsn: String,
}

fn default_storage_type() -> StorageKind {
    StorageKind::Sqlite
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_down_threshold")]
    pub down_threshold: u32,
    #[serde(default = "default_up_threshold")]
    pub up_threshold: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            down_threshold: default_down_threshold(),
            up_threshold: default_up_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_interval", with = "monitor::parse_duration_serde")]
    pub interval: Duration,
    #[serde(default, with = "monitor::parse_duration_opt_serde")]
    pub slow_latency: Option<Duration>,
    #[serde(default = "default_timeout", with = "monitor::parse_duration_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default = "default_true")]
    pub stagger_probes: bool,
    #[serde(default = "default_degraded_weight")]
    pub degraded_weight: f64,
    pub storage: StorageConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            slow_latency: Some(Duration::from_secs(5)),
            timeout: default_timeout(),
            max_concurrency: 0,
            stagger_probes: true,
            degraded_weight: default_degraded_weight(),
            storage: StorageConfig {
                kind: StorageKind::Sqlite,
                dsn: "relaypulse.db".to_string(),
            },
            events: EventsConfig::default(),
            monitors: Vec::new(),
        }
    }
}

impl Config {
    /// Parses a config file, applies env-var credential substitution, and
    /// validates every monitor. A failure here is fatal at startup but only
    /// advisory on reload (the caller decides whether to keep the old
    /// config — see `watch`).
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| RelayError::Config(format!("parsing {}: {e}", path.display())))?;

        for monitor in &mut config.monitors {
            substitute_env_placeholders(monitor);
            monitor.validate()?;
        }
        Ok(config)
    }
}

/// Resolves `{{API_KEY}}` placeholders in header values from
/// `MONITOR_<PROVIDER>_<SERVICE>_API_KEY`, uppercased and with
/// non-alphanumeric characters folded to `_`.
fn substitute_env_placeholders(monitor: &mut MonitorSpec) {
    let env_var = format!(
        "MONITOR_{}_{}_API_KEY",
        shout_case(&monitor.provider),
        shout_case(&monitor.service)
    );
    let Ok(value) = std::env::var(&env_var) else {
        return;
    };
    let mut resolved: HashMap<String, String> = HashMap::with_capacity(monitor.headers.len());
    for (k, v) in monitor.headers.drain() {
        resolved.insert(k, v.replace("{{API_KEY}}", &value));
    }
    monitor.headers = resolved;
}

fn shout_case(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Polls a config file's mtime and reparses it on change. Deliberately a
/// plain polling loop rather than an inotify dependency — the teacher's
/// dependency set stays minimal and this is the same discipline applied to
/// file-change detection.
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<std::time::SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_modified: None,
        }
    }

    /// Returns `Some(new_config)` if the file changed since the last poll
    /// and reparsed successfully. A parse failure is logged by the caller
    /// and the previous config is retained (returns `None`), per §7.
    pub fn poll(&mut self) -> Option<Result<Config>> {
        let modified = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        if self.last_modified == Some(modified) {
            return None;
        }
        self.last_modified = Some(modified);
        Some(Config::load_from_path(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config() {
        let file = write_temp(
            r#"
storage:
  type: sqlite
  dsn: "test.db"
monitors:
  - provider: anthropic
    service: messages
    url: "https://api.anthropic.com/v1/messages"
    success_contains: "content"
"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.monitors.len(), 1);
        assert_eq!(config.interval, default_interval());
    }

    #[test]
    #[serial_test::serial]
    fn substitutes_api_key_placeholder() {
        std::env::set_var("MONITOR_ANTHROPIC_MESSAGES_API_KEY", "sk-test-123");
        let mut monitor = MonitorSpec {
            provider: "anthropic".into(),
            service: "messages".into(),
            channel: None,
            method: "POST".into(),
            url: "https://api.anthropic.com/v1/messages".into(),
            headers: HashMap::from([("x-api-key".to_string(), "{{API_KEY}}".to_string())]),
            body: String::new(),
            success_contains: String::new(),
            slow_latency: None,
            timeout: None,
            disabled: false,
            proxy_url: None,
            interval: None,
            category: None,
            sponsor: None,
            sponsor_url: None,
            provider_url: None,
            board: None,
            badges: vec![],
        };
        substitute_env_placeholders(&mut monitor);
        assert_eq!(monitor.headers.get("x-api-key").unwrap(), "sk-test-123");
        std::env::remove_var("MONITOR_ANTHROPIC_MESSAGES_API_KEY");
    }

    #[test]
    fn rejects_bad_yaml() {
        let file = write_temp("not: [valid, yaml structure for Config");
        assert!(Config::load_from_path(file.path()).is_err());
    }
}
