//! One-shot HTTP probe construction, execution, and classification.

pub mod classify;
pub mod sse;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::MonitorSpec;
use crate::core::client_pool::ClientPool;
use crate::logging;

pub use classify::{Classification, Status, SubStatus};

/// A single probe outcome, ready to become a `ProbeRecord`.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: Status,
    pub sub_status: SubStatus,
    pub latency_ms: u32,
    pub http_status: u16,
}

/// Abstraction over "do one HTTP exchange", so classification logic can be
/// tested against a mock transport exactly as the teacher tests
/// `HttpMonitor` against `HttpClientTrait` mocks.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<(u16, String), String>;
}

#[derive(Clone)]
pub struct HttpProber {
    client_pool: std::sync::Arc<ClientPool>,
    #[cfg(not(feature = "network-monitoring"))]
    mock: Option<std::sync::Arc<dyn Transport>>,
}

impl HttpProber {
    pub fn new(client_pool: std::sync::Arc<ClientPool>) -> Self {
        Self {
            client_pool,
            #[cfg(not(feature = "network-monitoring"))]
            mock: None,
        }
    }

    #[cfg(not(feature = "network-monitoring"))]
    pub fn with_transport(mut self, transport: std::sync::Arc<dyn Transport>) -> Self {
        self.mock = Some(transport);
        self
    }

    /// Runs exactly one probe against `monitor`, returning a classified
    /// result. Never returns `Err` for transport failures — those become
    /// `(Status::Red, SubStatus::NetworkError)`, per §7: a probe's failure
    /// is data.
    pub async fn probe(&self, monitor: &MonitorSpec, default_timeout: Duration, default_slow: Option<Duration>) -> ProbeResult {
        let timeout = monitor.timeout.unwrap_or(default_timeout);
        let slow_latency = monitor.slow_latency.or(default_slow);
        let body = monitor.body.trim().as_bytes().to_vec();

        let start = Instant::now();
        let outcome = self.execute(monitor, &body, timeout).await;
        let latency = start.elapsed();

        let (http_status, body_text) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                logging::get().probe(
                    "probe_transport_error",
                    &format!("{}/{}: {err}", monitor.provider, monitor.service),
                );
                (0, String::new())
            }
        };

        let stage1 = classify::classify_stage1(http_status, latency, slow_latency);
        let final_class = if classify::needs_content_check(stage1, &monitor.success_contains) {
            let aggregated = sse::aggregate_body(&body_text);
            classify::verify_stage2(stage1, &aggregated, &monitor.success_contains)
        } else {
            stage1
        };

        if final_class.status == Status::Red {
            let snippet: String = body_text.chars().take(512).collect();
            logging::get().probe(
                "probe_red",
                &format!(
                    "{}/{} http={http_status} sub_status={:?} snippet={snippet:?}",
                    monitor.provider, monitor.service, final_class.sub_status
                ),
            );
        }

        ProbeResult {
            status: final_class.status,
            sub_status: final_class.sub_status,
            latency_ms: latency.as_millis() as u32,
            http_status,
        }
    }

    #[cfg(feature = "network-monitoring")]
    async fn execute(
        &self,
        monitor: &MonitorSpec,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<(u16, String), String> {
        let client = self
            .client_pool
            .get(&monitor.provider, monitor.proxy_url.as_deref())
            .await
            .map_err(|e| e.to_string())?;

        let url = monitor.url.clone();
        let method = monitor.method.clone();
        let headers = monitor.headers.clone();
        let proxy = client.proxy().map(str::to_string);
        let body = body.to_vec();

        tokio::task::spawn_blocking(move || run_curl_request(&url, &method, &headers, &body, proxy.as_deref(), timeout))
            .await
            .map_err(|e| format!("curl task join failed: {e}"))?
    }

    #[cfg(not(feature = "network-monitoring"))]
    async fn execute(
        &self,
        monitor: &MonitorSpec,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<(u16, String), String> {
        match &self.mock {
            Some(transport) => {
                transport
                    .execute(&monitor.method, &monitor.url, &monitor.headers, body, timeout)
                    .await
            }
            None => Ok((200, String::new())),
        }
    }
}

/// Runs one blocking curl request, writing headers as raw "Name: value"
/// lines via `curl::easy::List` so the configured case survives onto the
/// wire (§9: "overwrite stdlib canonicalization") — `isahc`/`http::HeaderName`
/// forces every header name to lowercase with no escape hatch, which is why
/// this crate uses curl for the real transport instead. Mirrors the
/// teacher's `RealCurlRunner::run`, minus the phase-timing instrumentation
/// this crate has no use for.
#[cfg(feature = "network-monitoring")]
fn run_curl_request(
    url: &str,
    method: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    proxy: Option<&str>,
    timeout: Duration,
) -> std::result::Result<(u16, String), String> {
    use curl::easy::Easy;

    let mut handle = Easy::new();
    handle.url(url).map_err(|e| format!("url set failed: {e}"))?;
    handle.timeout(timeout).map_err(|e| format!("timeout set failed: {e}"))?;
    handle.follow_location(false).map_err(|e| format!("redirect policy failed: {e}"))?;
    handle.cookie_file("").map_err(|e| format!("cookie engine failed: {e}"))?;

    if let Some(proxy) = proxy {
        handle.proxy(proxy).map_err(|e| format!("proxy set failed: {e}"))?;
    }

    handle.custom_request(method).map_err(|e| format!("method set failed: {e}"))?;
    if !body.is_empty() {
        handle
            .post_fields_copy(body)
            .map_err(|e| format!("body set failed: {e}"))?;
    }

    let mut header_list = curl::easy::List::new();
    for (key, value) in headers {
        header_list
            .append(&format!("{key}: {value}"))
            .map_err(|e| format!("header append failed: {e}"))?;
    }
    handle
        .http_headers(header_list)
        .map_err(|e| format!("headers set failed: {e}"))?;

    let mut response_body = Vec::new();
    {
        let mut transfer = handle.transfer();
        transfer
            .write_function(|data| {
                response_body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| format!("write function failed: {e}"))?;
        transfer.perform().map_err(|e| format!("request perform failed: {e}"))?;
    }

    let status = handle
        .response_code()
        .map_err(|e| format!("response code failed: {e}"))? as u16;
    let text = String::from_utf8_lossy(&response_body).into_owned();

    Ok((status, text))
}
