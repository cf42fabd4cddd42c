//! Read-only query engine over the [`Store`] trait: timelines, aggregates,
//! the monitor roster, and event history. Kept separate from `Scheduler` so
//! a CLI subcommand or a future read API can use it without pulling in any
//! probing machinery.

use std::sync::Arc;

use crate::config::{Config, MonitorKey};
use crate::core::store::{Aggregate, Event, EventCursor, Store, TimelineBucket};
use crate::error::Result;

pub struct MonitorSummary {
    pub key: MonitorKey,
    pub disabled: bool,
    pub category: Option<String>,
    pub board: Option<String>,
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    degraded_weight: f64,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>, degraded_weight: f64) -> Self {
        Self { store, degraded_weight }
    }

    pub async fn timeline(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
        bucket_count: usize,
    ) -> Result<Vec<TimelineBucket>> {
        self.store
            .timeline(key, from_s, to_s, bucket_count, self.degraded_weight)
            .await
    }

    pub async fn aggregate(&self, key: &MonitorKey, from_s: i64, to_s: i64) -> Result<Aggregate> {
        self.store.aggregate(key, from_s, to_s, self.degraded_weight).await
    }

    pub async fn list_events(&self, key: Option<&MonitorKey>, cursor: EventCursor) -> Result<Vec<(u64, Event)>> {
        self.store.list_events(key, cursor).await
    }

    /// Every configured monitor, regardless of whether it has samples yet.
    /// The roster comes from config, not the store, since a monitor added
    /// moments ago has no rows to derive it from.
    pub fn list_monitors(config: &Config) -> Vec<MonitorSummary> {
        config
            .monitors
            .iter()
            .map(|m| MonitorSummary {
                key: m.key(),
                disabled: m.disabled,
                category: m.category.clone(),
                board: m.board.clone(),
            })
            .collect()
    }
}
