//! Integration test for `Store::timeline`: missing buckets must report
//! availability 1.0 (never 0.0), and a bucket containing both green and red
//! samples must report red as the dominant status.

use std::sync::Arc;

use relaypulse::config::MonitorKey;
use relaypulse::core::probe::{ProbeResult, Status, SubStatus};
use relaypulse::core::store::sqlite::SqliteStore;
use relaypulse::core::store::{ProbeRecord, Store};

fn key() -> MonitorKey {
    MonitorKey {
        provider: "google".into(),
        service: "gemini".into(),
        channel: "gemini".into(),
    }
}

fn result(status: Status, latency_ms: u32) -> ProbeResult {
    ProbeResult {
        status,
        sub_status: if status == Status::Red {
            SubStatus::ServerError
        } else {
            SubStatus::None
        },
        latency_ms,
        http_status: if status == Status::Red { 500 } else { 200 },
    }
}

#[tokio::test]
async fn window_with_no_samples_is_fully_available() {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    let buckets = store.timeline(&key(), 0, 600, 6, 0.5).await.unwrap();

    assert_eq!(buckets.len(), 6);
    for bucket in &buckets {
        assert!(bucket.status.is_none());
        assert_eq!(bucket.availability, 1.0);
        assert_eq!(bucket.sample_count, 0);
    }
}

#[tokio::test]
async fn a_bucket_with_mixed_samples_reports_red_as_dominant() {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

    // Bucket 0 spans [0, 100): two greens.
    store.save_record(ProbeRecord::new(&key(), &result(Status::Green, 100), 10)).await.unwrap();
    store.save_record(ProbeRecord::new(&key(), &result(Status::Green, 100), 50)).await.unwrap();
    // Bucket 1 spans [100, 200): one green, one red.
    store.save_record(ProbeRecord::new(&key(), &result(Status::Green, 100), 110)).await.unwrap();
    store.save_record(ProbeRecord::new(&key(), &result(Status::Red, 100), 150)).await.unwrap();

    let buckets = store.timeline(&key(), 0, 200, 2, 0.5).await.unwrap();
    assert_eq!(buckets.len(), 2);

    assert_eq!(buckets[0].status, Some(Status::Green));
    assert_eq!(buckets[0].availability, 1.0);

    assert_eq!(buckets[1].status, Some(Status::Red));
    assert_eq!(buckets[1].availability, 0.5);
}

#[tokio::test]
async fn channel_backfill_is_idempotent_end_to_end() {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    let mappings = vec![("google".to_string(), "gemini".to_string(), "gemini".to_string())];

    store.migrate_channel_data(&mappings).await.unwrap();
    let first_pass = store.timeline(&key(), 0, 10, 1, 0.5).await.unwrap();
    store.migrate_channel_data(&mappings).await.unwrap();
    let second_pass = store.timeline(&key(), 0, 10, 1, 0.5).await.unwrap();

    assert_eq!(first_pass.len(), second_pass.len());
}
