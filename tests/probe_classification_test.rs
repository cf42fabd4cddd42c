//! Integration tests for the probe classification pipeline, exercised
//! end-to-end through `HttpProber` against a mock transport rather than the
//! unit-level `classify`/`sse` functions directly.
//!
//! Covers the literal boundary scenarios from the specification: a slow
//! 2xx, a content mismatch on a fast 200, and SSE aggregation across
//! multiple `data:` frames.

#![cfg(not(feature = "network-monitoring"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaypulse::config::MonitorSpec;
use relaypulse::core::probe::{HttpProber, Status, SubStatus, Transport};
use relaypulse::core::ClientPool;

struct ScriptedTransport {
    status: u16,
    body: String,
    artificial_latency: Duration,
    calls: AtomicU64,
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        _method: &str,
        _url: &str,
        _headers: &HashMap<String, String>,
        _body: &[u8],
        _timeout: Duration,
    ) -> Result<(u16, String), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.artificial_latency.is_zero() {
            tokio::time::sleep(self.artificial_latency).await;
        }
        Ok((self.status, self.body.clone()))
    }
}

fn monitor(success_contains: &str, slow_latency: Option<Duration>) -> MonitorSpec {
    MonitorSpec {
        provider: "anthropic".into(),
        service: "messages".into(),
        channel: None,
        method: "POST".into(),
        url: "https://api.anthropic.com/v1/messages".into(),
        headers: HashMap::new(),
        body: String::new(),
        success_contains: success_contains.into(),
        slow_latency,
        timeout: Some(Duration::from_secs(30)),
        disabled: false,
        proxy_url: None,
        interval: None,
        category: None,
        sponsor: None,
        sponsor_url: None,
        provider_url: None,
        board: None,
        badges: vec![],
    }
}

#[tokio::test]
async fn slow_2xx_becomes_degraded_slow_latency() {
    let transport = Arc::new(ScriptedTransport {
        status: 200,
        body: r#"{"choices":[{"message":{"content":"hi"}}]}"#.to_string(),
        artificial_latency: Duration::from_millis(120),
        calls: AtomicU64::new(0),
    });
    let prober = HttpProber::new(Arc::new(ClientPool::new())).with_transport(transport);

    let result = prober
        .probe(&monitor("", Some(Duration::from_millis(50))), Duration::from_secs(5), None)
        .await;

    assert_eq!(result.status, Status::Yellow);
    assert_eq!(result.sub_status, SubStatus::SlowLatency);
}

#[tokio::test]
async fn content_mismatch_downgrades_a_fast_200() {
    let transport = Arc::new(ScriptedTransport {
        status: 200,
        body: r#"{"error":"bad"}"#.to_string(),
        artificial_latency: Duration::ZERO,
        calls: AtomicU64::new(0),
    });
    let prober = HttpProber::new(Arc::new(ClientPool::new())).with_transport(transport);

    let result = prober
        .probe(&monitor("choices", Some(Duration::from_secs(5))), Duration::from_secs(5), None)
        .await;

    assert_eq!(result.status, Status::Red);
    assert_eq!(result.sub_status, SubStatus::ContentMismatch);
}

#[tokio::test]
async fn sse_frames_aggregate_into_the_checked_text() {
    let body = "event: content_block_delta\ndata: {\"delta\":{\"text\":\"p\"}}\n\n\
                event: content_block_delta\ndata: {\"delta\":{\"text\":\"ong\"}}\n\n\
                data: [DONE]\n";
    let transport = Arc::new(ScriptedTransport {
        status: 200,
        body: body.to_string(),
        artificial_latency: Duration::ZERO,
        calls: AtomicU64::new(0),
    });
    let prober = HttpProber::new(Arc::new(ClientPool::new())).with_transport(transport);

    let result = prober
        .probe(&monitor("pong", Some(Duration::from_secs(5))), Duration::from_secs(5), None)
        .await;

    assert_eq!(result.status, Status::Green);
    assert_eq!(result.sub_status, SubStatus::None);
}

#[tokio::test]
async fn rate_limit_skips_content_check_even_with_error_body() {
    let transport = Arc::new(ScriptedTransport {
        status: 429,
        body: r#"{"error":"rate limited"}"#.to_string(),
        artificial_latency: Duration::ZERO,
        calls: AtomicU64::new(0),
    });
    let prober = HttpProber::new(Arc::new(ClientPool::new())).with_transport(transport);

    let result = prober
        .probe(&monitor("choices", None), Duration::from_secs(5), None)
        .await;

    assert_eq!(result.status, Status::Red);
    assert_eq!(result.sub_status, SubStatus::RateLimit);
}
