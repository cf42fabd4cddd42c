//! Keyed client configuration reuse.
//!
//! One resolved, validated proxy configuration per `(provider, proxy_url)`
//! pair, built once and shared across every probe against that
//! provider/proxy combination. The real transport is a fresh `curl::easy::Easy`
//! handle per request (see `core::probe`, mirroring the teacher's
//! `RealCurlRunner`, which does the same) — libcurl's easy handles aren't
//! meant to be cached across unrelated requests, so this module's job is
//! just keyed proxy-config reuse, not connection pooling.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{RelayError, Result};
use crate::logging;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    provider: String,
    proxy_url: Option<String>,
}

/// A cheaply-clonable handle carrying the resolved proxy config for one
/// `(provider, proxy_url)` pair. Real transport is feature-gated behind
/// `network-monitoring`; without it, a mock stands in so the rest of the
/// crate (scheduler/store/event-detector) is testable without sockets.
#[derive(Clone)]
pub struct ClientHandle {
    #[cfg(feature = "network-monitoring")]
    proxy: Option<Arc<str>>,
    #[cfg(not(feature = "network-monitoring"))]
    _inner: Arc<()>,
}

impl ClientHandle {
    /// The proxy URI to pass to `curl::easy::Easy::proxy`, if one was
    /// configured for this provider.
    #[cfg(feature = "network-monitoring")]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}

pub struct ClientPool {
    clients: RwLock<HashMap<PoolKey, ClientHandle>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the pooled client for `(provider, proxy_url)`, building and
    /// caching one on first use (double-checked: a read lock is tried
    /// first, then a write lock re-checks before inserting).
    pub async fn get(&self, provider: &str, proxy_url: Option<&str>) -> Result<ClientHandle> {
        let key = PoolKey {
            provider: provider.to_string(),
            proxy_url: proxy_url.map(str::to_string),
        };

        if let Some(handle) = self.clients.read().await.get(&key) {
            return Ok(handle.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get(&key) {
            return Ok(handle.clone());
        }

        let handle = build_client(proxy_url)?;
        logging::get().client_pool(
            "client_created",
            &format!("provider={provider} proxy={}", proxy_url.unwrap_or("<env>")),
        );
        clients.insert(key, handle.clone());
        Ok(handle)
    }

    /// Drains every pooled client. Called during graceful shutdown (§5).
    pub async fn shutdown(&self) {
        let mut clients = self.clients.write().await;
        clients.clear();
        logging::get().client_pool("shutdown", "all pooled clients dropped");
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "network-monitoring")]
fn build_client(proxy_url: Option<&str>) -> Result<ClientHandle> {
    let proxy = match proxy_url {
        None | Some("") => None,
        Some(raw) => Some(Arc::from(resolve_proxy(raw)?)),
    };
    Ok(ClientHandle { proxy })
}

#[cfg(feature = "network-monitoring")]
fn resolve_proxy(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" | "socks5" | "socks" => Ok(raw.to_string()),
        other => Err(RelayError::Config(format!(
            "unsupported proxy scheme for client pool: {other}"
        ))),
    }
}

#[cfg(not(feature = "network-monitoring"))]
fn build_client(proxy_url: Option<&str>) -> Result<ClientHandle> {
    if let Some(raw) = proxy_url.filter(|s| !s.is_empty()) {
        let parsed = url::Url::parse(raw)?;
        if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks") {
            return Err(RelayError::Config(format!(
                "unsupported proxy scheme for client pool: {}",
                parsed.scheme()
            )));
        }
    }
    Ok(ClientHandle {
        _inner: Arc::new(()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_client_for_same_key() {
        let pool = ClientPool::new();
        pool.get("anthropic", None).await.unwrap();
        pool.get("anthropic", None).await.unwrap();
        assert_eq!(pool.len().await, 1, "second get() for the same key must not build again");
    }

    #[tokio::test]
    async fn rejects_unsupported_proxy_scheme() {
        let pool = ClientPool::new();
        let err = pool.get("anthropic", Some("ftp://proxy.local")).await;
        assert!(err.is_err());
    }
}
