//! Client-server store backend, for deployments that share one database
//! across multiple monitor processes.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::MonitorKey;
use crate::core::events::{Event, EventKind, EventSeverity};
use crate::core::probe::{Status, SubStatus};
use crate::error::Result;

use super::{
    compute_aggregate, compute_bucket, event_kind_str, migrations, Aggregate, EventCursor, ProbeRecord, Store,
    TimelineBucket,
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in migrations::SCHEMA_SQL {
            sqlx::query(&postgres_dialect(statement)).execute(&self.pool).await?;
        }
        sqlx::query(migrations::RECORD_CURSOR_SQL)
            .bind(migrations::SCHEMA_VERSION)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn records_in_window(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
    ) -> Result<Vec<ProbeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, service, channel, timestamp_s, status, sub_status, latency_ms
            FROM probe_records
            WHERE provider = $1 AND service = $2 AND channel = $3
              AND timestamp_s >= $4 AND timestamp_s < $5
            ORDER BY timestamp_s ASC
            "#,
        )
        .bind(&key.provider)
        .bind(&key.service)
        .bind(&key.channel)
        .bind(from_s)
        .bind(to_s)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

/// `probe_records.id`/`events.id` use `AUTOINCREMENT` in the shared SQL
/// literals (SQLite syntax); Postgres wants `SERIAL` there instead.
fn postgres_dialect(statement: &str) -> String {
    statement.replace("INTEGER PRIMARY KEY AUTOINCREMENT", "SERIAL PRIMARY KEY")
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<ProbeRecord> {
    let status_int: i32 = row.try_get("status")?;
    let sub_status_str: String = row.try_get("sub_status")?;
    Ok(ProbeRecord {
        provider: row.try_get("provider")?,
        service: row.try_get("service")?,
        channel: row.try_get("channel")?,
        timestamp_s: row.try_get("timestamp_s")?,
        status: status_from_i32(status_int),
        sub_status: sub_status_from_str(&sub_status_str),
        latency_ms: row.try_get::<i32, _>("latency_ms")? as u32,
    })
}

fn status_from_i32(value: i32) -> Status {
    match value {
        1 => Status::Green,
        2 => Status::Yellow,
        _ => Status::Red,
    }
}

fn sub_status_from_str(value: &str) -> SubStatus {
    match value {
        "slow_latency" => SubStatus::SlowLatency,
        "rate_limit" => SubStatus::RateLimit,
        "server_error" => SubStatus::ServerError,
        "client_error" => SubStatus::ClientError,
        "auth_error" => SubStatus::AuthError,
        "invalid_request" => SubStatus::InvalidRequest,
        "network_error" => SubStatus::NetworkError,
        "content_mismatch" => SubStatus::ContentMismatch,
        _ => SubStatus::None,
    }
}

fn sub_status_to_str(value: SubStatus) -> &'static str {
    match value {
        SubStatus::None => "none",
        SubStatus::SlowLatency => "slow_latency",
        SubStatus::RateLimit => "rate_limit",
        SubStatus::ServerError => "server_error",
        SubStatus::ClientError => "client_error",
        SubStatus::AuthError => "auth_error",
        SubStatus::InvalidRequest => "invalid_request",
        SubStatus::NetworkError => "network_error",
        SubStatus::ContentMismatch => "content_mismatch",
    }
}

fn severity_to_str(value: EventSeverity) -> &'static str {
    match value {
        EventSeverity::Info => "info",
        EventSeverity::Warning => "warning",
        EventSeverity::Critical => "critical",
    }
}

fn severity_from_str(value: &str) -> EventSeverity {
    match value {
        "critical" => EventSeverity::Critical,
        "info" => EventSeverity::Info,
        _ => EventSeverity::Warning,
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_record(&self, record: ProbeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO probe_records (provider, service, channel, timestamp_s, status, sub_status, latency_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.provider)
        .bind(&record.service)
        .bind(&record.channel)
        .bind(record.timestamp_s)
        .bind(record.status as i32)
        .bind(sub_status_to_str(record.sub_status))
        .bind(record.latency_ms as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn timeline(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
        bucket_count: usize,
        degraded_weight: f64,
    ) -> Result<Vec<TimelineBucket>> {
        if bucket_count == 0 || to_s <= from_s {
            return Ok(Vec::new());
        }
        let records = self.records_in_window(key, from_s, to_s).await?;
        let span = (to_s - from_s) as f64 / bucket_count as f64;

        let mut buckets = Vec::with_capacity(bucket_count);
        for i in 0..bucket_count {
            let bucket_start = from_s + (i as f64 * span) as i64;
            let bucket_end = from_s + ((i + 1) as f64 * span) as i64;
            let samples: Vec<&ProbeRecord> = records
                .iter()
                .filter(|r| r.timestamp_s >= bucket_start && r.timestamp_s < bucket_end)
                .collect();
            buckets.push(compute_bucket(bucket_start, &samples, degraded_weight));
        }
        Ok(buckets)
    }

    async fn aggregate(
        &self,
        key: &MonitorKey,
        from_s: i64,
        to_s: i64,
        degraded_weight: f64,
    ) -> Result<Aggregate> {
        let records = self.records_in_window(key, from_s, to_s).await?;
        let refs: Vec<&ProbeRecord> = records.iter().collect();
        Ok(compute_aggregate(&refs, degraded_weight))
    }

    async fn append_event(&self, event: &Event) -> Result<u64> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (provider, service, channel, kind, opened_at, closed_at, severity, trigger_sub_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&event.monitor_key.provider)
        .bind(&event.monitor_key.service)
        .bind(&event.monitor_key.channel)
        .bind(event_kind_str(event.kind))
        .bind(event.opened_at)
        .bind(event.closed_at)
        .bind(severity_to_str(event.severity))
        .bind(sub_status_to_str(event.trigger_sub_status))
        .fetch_one(&self.pool)
        .await?;

        let id: i32 = row.try_get("id")?;
        Ok(id as u64)
    }

    async fn close_event(&self, event_id: u64, closed_at: i64) -> Result<()> {
        sqlx::query("UPDATE events SET closed_at = $1 WHERE id = $2")
            .bind(closed_at)
            .bind(event_id as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_events(&self, key: Option<&MonitorKey>, cursor: EventCursor) -> Result<Vec<(u64, Event)>> {
        let rows = if let Some(key) = key {
            sqlx::query(
                r#"
                SELECT id, provider, service, channel, kind, opened_at, closed_at, severity, trigger_sub_status
                FROM events
                WHERE provider = $1 AND service = $2 AND channel = $3
                  AND ($4::bigint IS NULL OR id > $4)
                ORDER BY id ASC
                LIMIT $5
                "#,
            )
            .bind(&key.provider)
            .bind(&key.service)
            .bind(&key.channel)
            .bind(cursor.after_id.map(|v| v as i64))
            .bind(cursor.limit as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT id, provider, service, channel, kind, opened_at, closed_at, severity, trigger_sub_status
                FROM events
                WHERE ($1::bigint IS NULL OR id > $1)
                ORDER BY id ASC
                LIMIT $2
                "#,
            )
            .bind(cursor.after_id.map(|v| v as i64))
            .bind(cursor.limit as i64)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| -> Result<(u64, Event)> {
                let id: i32 = row.try_get("id")?;
                let kind_str: String = row.try_get("kind")?;
                let severity_str: String = row.try_get("severity")?;
                let sub_status_str: String = row.try_get("trigger_sub_status")?;
                Ok((
                    id as u64,
                    Event {
                        monitor_key: MonitorKey {
                            provider: row.try_get("provider")?,
                            service: row.try_get("service")?,
                            channel: row.try_get("channel")?,
                        },
                        kind: if kind_str == "down" { EventKind::Down } else { EventKind::Up },
                        opened_at: row.try_get("opened_at")?,
                        closed_at: row.try_get("closed_at")?,
                        severity: severity_from_str(&severity_str),
                        trigger_sub_status: sub_status_from_str(&sub_status_str),
                    },
                ))
            })
            .collect()
    }

    async fn migrate_channel_data(&self, mappings: &[(String, String, String)]) -> Result<()> {
        for (provider, service, channel) in mappings {
            sqlx::query(migrations::BACKFILL_CHANNEL_SQL)
                .bind(provider)
                .bind(service)
                .bind(channel)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn purge_expired_records(&self, older_than_s: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM probe_records WHERE timestamp_s < $1")
            .bind(older_than_s)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_rewrite_swaps_autoincrement_for_serial() {
        let out = postgres_dialect("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT)");
        assert_eq!(out, "CREATE TABLE t (id SERIAL PRIMARY KEY)");
    }
}
