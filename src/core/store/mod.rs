//! Append-only probe storage and aggregate/timeline queries.
//!
//! Two interchangeable backends sit behind the [`Store`] trait: an embedded
//! single-file SQLite store (single-connection pool, serializing writes)
//! and a client-server Postgres store (pooled connections). Both share the
//! same schema, migrations, and the bucketed-availability math in this
//! module, which is intentionally backend-agnostic so it can be unit
//! tested without a database.

pub mod migrations;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::time::Duration;

use crate::config::MonitorKey;
use crate::core::events::{Event, EventKind};
use crate::core::probe::{ProbeResult, Status, SubStatus};
use crate::error::Result;

/// How long a `ProbeRecord` survives before the retention sweep purges it
/// (§3: "retained by a TTL sweep"). Not config-exposed — the spec's
/// recognized config keys (§6) don't list a retention knob, so this is a
/// fixed implementation constant rather than a new surface.
pub const RECORD_RETENTION: Duration = Duration::from_secs(60 * 60 * 24 * 90);

/// One persisted probe outcome. Append-only: never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub provider: String,
    pub service: String,
    pub channel: String,
    pub timestamp_s: i64,
    pub status: Status,
    pub sub_status: SubStatus,
    pub latency_ms: u32,
}

impl ProbeRecord {
    pub fn new(key: &MonitorKey, result: &ProbeResult, timestamp_s: i64) -> Self {
        Self {
            provider: key.provider.clone(),
            service: key.service.clone(),
            channel: key.channel.clone(),
            timestamp_s,
            status: result.status,
            sub_status: result.sub_status,
            latency_ms: result.latency_ms,
        }
    }

    /// Per-sample availability contribution used by bucket aggregation:
    /// 1.0 for green, `degraded_weight` for yellow, 0.0 for red.
    pub fn availability(&self, degraded_weight: f64) -> f64 {
        match self.status {
            Status::Green => 1.0,
            Status::Yellow => degraded_weight,
            Status::Red => 0.0,
        }
    }
}

/// One point on an availability timeline. `status = None` marks a bucket
/// with no samples — rendered distinctly, but its availability still
/// counts as 1.0 (§4.4: "missing counts as 1.0").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub bucket_start_s: i64,
    pub status: Option<Status>,
    pub mean_latency_ms: Option<f64>,
    pub availability: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub availability: f64,
    pub mean_latency_ms: Option<f64>,
    pub green_count: usize,
    pub yellow_count: usize,
    pub red_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct EventCursor {
    pub after_id: Option<u64>,
    pub limit: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_record(&self, record: ProbeRecord) -> Result<()>;

    async fn timeline(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
        bucket_count: usize,
        degraded_weight: f64,
    ) -> Result<Vec<TimelineBucket>>;

    async fn aggregate(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
        degraded_weight: f64,
    ) -> Result<Aggregate>;

    async fn append_event(&self, event: &Event) -> Result<u64>;
    async fn close_event(&self, event_id: u64, closed_at: i64) -> Result<()>;
    async fn list_events(&self, key: Option<&MonitorKey>, cursor: EventCursor) -> Result<Vec<(u64, Event)>>;

    /// Back-fills a legacy NULL/empty `channel` column from the mapping
    /// derived from the current config (first non-empty channel per
    /// `(provider, service)`). Idempotent.
    async fn migrate_channel_data(&self, mappings: &[(String, String, String)]) -> Result<()>;

    /// Deletes every `ProbeRecord` older than `older_than_s`, returning the
    /// number of rows removed. The TTL sweep named in §3; run periodically,
    /// never inline with a probe write.
    async fn purge_expired_records(&self, older_than_s: i64) -> Result<u64>;
}

/// Dominance order for picking a bucket's representative status when it
/// contains multiple samples: red beats yellow beats green (§4.4).
pub fn dominant_status(samples: &[&ProbeRecord]) -> Option<Status> {
    if samples.iter().any(|r| r.status == Status::Red) {
        return Some(Status::Red);
    }
    if samples.iter().any(|r| r.status == Status::Yellow) {
        return Some(Status::Yellow);
    }
    if samples.iter().any(|r| r.status == Status::Green) {
        return Some(Status::Green);
    }
    None
}

/// Computes one bucket from the records falling inside it. A bucket with no
/// records is "missing" — `status = None`, `availability = 1.0` (never
/// 0.0), matching the intentional design choice in §4.4: newly added
/// monitors should not drag the displayed number down before they
/// accumulate samples.
pub fn compute_bucket(bucket_start_s: i64, samples: &[&ProbeRecord], degraded_weight: f64) -> TimelineBucket {
    if samples.is_empty() {
        return TimelineBucket {
            bucket_start_s,
            status: None,
            mean_latency_ms: None,
            availability: 1.0,
            sample_count: 0,
        };
    }

    let availability =
        samples.iter().map(|r| r.availability(degraded_weight)).sum::<f64>() / samples.len() as f64;
    let mean_latency_ms =
        samples.iter().map(|r| r.latency_ms as f64).sum::<f64>() / samples.len() as f64;

    TimelineBucket {
        bucket_start_s,
        status: dominant_status(samples),
        mean_latency_ms: Some(mean_latency_ms),
        availability,
        sample_count: samples.len(),
    }
}

pub fn compute_aggregate(samples: &[&ProbeRecord], degraded_weight: f64) -> Aggregate {
    if samples.is_empty() {
        return Aggregate {
            availability: 1.0,
            mean_latency_ms: None,
            green_count: 0,
            yellow_count: 0,
            red_count: 0,
        };
    }

    let availability =
        samples.iter().map(|r| r.availability(degraded_weight)).sum::<f64>() / samples.len() as f64;
    let mean_latency_ms =
        samples.iter().map(|r| r.latency_ms as f64).sum::<f64>() / samples.len() as f64;

    Aggregate {
        availability,
        mean_latency_ms: Some(mean_latency_ms),
        green_count: samples.iter().filter(|r| r.status == Status::Green).count(),
        yellow_count: samples.iter().filter(|r| r.status == Status::Yellow).count(),
        red_count: samples.iter().filter(|r| r.status == Status::Red).count(),
    }
}

pub(crate) fn event_kind_str(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Down => "down",
        EventKind::Up => "up",
    }
}
