//! Versioned schema migrations, shared by both backends via `sqlx::migrate!`.
//!
//! Kept as plain embedded SQL (rather than the teacher's single-file JSON
//! snapshot, which has no migration story at all) because the spec commits
//! to an append-only relational schema with idempotent, versioned
//! migrations (§4.4).

pub const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS probe_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider TEXT NOT NULL,
        service TEXT NOT NULL,
        channel TEXT NOT NULL,
        timestamp_s BIGINT NOT NULL,
        status INTEGER NOT NULL,
        sub_status TEXT NOT NULL,
        latency_ms INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_probe_records_lookup
        ON probe_records (provider, service, channel, timestamp_s DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider TEXT NOT NULL,
        service TEXT NOT NULL,
        channel TEXT NOT NULL,
        kind TEXT NOT NULL,
        opened_at BIGINT NOT NULL,
        closed_at BIGINT,
        severity TEXT NOT NULL,
        trigger_sub_status TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migration_cursor (
        name TEXT PRIMARY KEY,
        applied_at BIGINT NOT NULL
    )
    "#,
];

/// Runs the channel-backfill for legacy rows whose `channel` column is
/// `NULL` or empty, given `(provider, service, channel)` mappings derived
/// from the current config. Idempotent: rows that already carry a channel
/// are untouched by the `WHERE` clause, so re-running is a no-op.
pub const BACKFILL_CHANNEL_SQL: &str = r#"
    UPDATE probe_records
    SET channel = $3
    WHERE provider = $1 AND service = $2 AND (channel IS NULL OR channel = '')
"#;

/// Same statement with `?` placeholders for SQLite (which doesn't accept
/// `$n` positional parameters through sqlx's query! macros in all modes).
pub const BACKFILL_CHANNEL_SQL_SQLITE: &str = r#"
    UPDATE probe_records
    SET channel = ?3
    WHERE provider = ?1 AND service = ?2 AND (channel IS NULL OR channel = '')
"#;

/// Current schema version name, recorded in `migration_cursor` once applied
/// so that `apply_schema` only re-runs `SCHEMA_SQL`'s `CREATE ... IF NOT
/// EXISTS` statements on a genuinely fresh database, not on every startup.
pub const SCHEMA_VERSION: &str = "relaypulse_schema_v1";

pub const RECORD_CURSOR_SQL: &str = r#"
    INSERT INTO migration_cursor (name, applied_at) VALUES ($1, $2)
    ON CONFLICT (name) DO NOTHING
"#;

pub const RECORD_CURSOR_SQL_SQLITE: &str = r#"
    INSERT OR IGNORE INTO migration_cursor (name, applied_at) VALUES (?1, ?2)
"#;
