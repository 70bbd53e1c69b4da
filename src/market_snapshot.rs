//! Market-snapshot fetching: a live brief from a web-browsing LLM, cached with TTL,
//! falling back to a degraded snapshot on persistent failure.
//!
//! Grounded on the teacher's `llm_providers::gemini::GeminiProvider` raw-`reqwest` call
//! shape, with retry borrowed from the `tokio-retry` crate already in the dependency set.

use crate::config::MarketSnapshotConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::time::Duration as StdDuration;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{instrument, warn};

use crate::model::MarketSnapshot;

const FALLBACK_BODY: &str = "Market snapshot unavailable; proceeding without live market context.";
const SNAPSHOT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(45);
const MAX_ATTEMPTS: usize = 3;

/// Backend capable of producing one market-snapshot body via a web-browsing LLM call.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Perform one (non-retried) snapshot call; callers apply the retry policy.
    async fn fetch_once(&self) -> anyhow::Result<(String, String)>;
}

/// `reqwest`-backed snapshot backend calling a chat-completions-style endpoint with a
/// web-search tool flag enabled.
pub struct HttpSnapshotBackend {
    client: reqwest::Client,
    config: MarketSnapshotConfig,
    api_key: String,
}

impl HttpSnapshotBackend {
    /// Build a backend from config, resolving the API key from its `*_env` variable.
    pub fn new(config: MarketSnapshotConfig) -> anyhow::Result<Self> {
        let api_key = crate::config::SentinelConfig::resolve_api_key(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(SNAPSHOT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl SnapshotBackend for HttpSnapshotBackend {
    async fn fetch_once(&self) -> anyhow::Result<(String, String)> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": "You are a crypto market analyst. Produce a concise, current market brief."},
                {"role": "user", "content": "Summarize current crypto market conditions."},
            ],
            "tools": [{"type": "web_search"}],
        });

        let response = self
            .client
            .post(self.config.effective_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("snapshot endpoint returned {status}: {text}");
        }

        let parsed: serde_json::Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("snapshot response missing content"))?
            .to_string();
        Ok((content, self.config.model.clone()))
    }
}

struct Cached {
    snapshot: MarketSnapshot,
    expires_at: DateTime<Utc>,
}

/// TTL-cached, single-flight market-snapshot service.
pub struct MarketSnapshotService {
    backend: Box<dyn SnapshotBackend>,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl MarketSnapshotService {
    /// Build a service from a backend and the configured TTL.
    pub fn new(backend: Box<dyn SnapshotBackend>, ttl_minutes: i64) -> Self {
        Self {
            backend,
            ttl: Duration::minutes(ttl_minutes),
            cache: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Return the cached snapshot if fresh and `use_cached` is true; otherwise refresh.
    #[instrument(skip(self))]
    pub async fn get(&self, use_cached: bool) -> MarketSnapshot {
        if use_cached
            && let Some(snapshot) = self.fresh_cached()
        {
            return snapshot;
        }

        // Single-flight: only one concurrent refresh proceeds; others wait then re-check.
        let _guard = self.refresh_lock.lock().await;
        if use_cached
            && let Some(snapshot) = self.fresh_cached()
        {
            return snapshot;
        }

        let snapshot = self.refresh().await;
        let mut cache = self.cache.lock();
        *cache = Some(Cached {
            snapshot: snapshot.clone(),
            expires_at: snapshot.generated_at + self.ttl,
        });
        snapshot
    }

    /// Drop the cached value, forcing the next `get` to refresh.
    pub fn clear(&self) {
        *self.cache.lock() = None;
    }

    fn fresh_cached(&self) -> Option<MarketSnapshot> {
        let cache = self.cache.lock();
        let cached = cache.as_ref()?;
        if cached.expires_at > Utc::now() {
            Some(cached.snapshot.clone())
        } else {
            None
        }
    }

    async fn refresh(&self) -> MarketSnapshot {
        let strategy = ExponentialBackoff::from_millis(200)
            .map(jitter)
            .take(MAX_ATTEMPTS - 1);

        let result = Retry::spawn(strategy, || self.backend.fetch_once()).await;

        match result {
            Ok((body, model)) => MarketSnapshot {
                generated_at: Utc::now(),
                body,
                source_model: model,
                is_fallback: false,
            },
            Err(error) => {
                warn!(%error, "market snapshot failed after retries, using fallback");
                MarketSnapshot {
                    generated_at: Utc::now(),
                    body: FALLBACK_BODY.to_string(),
                    source_model: String::new(),
                    is_fallback: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingBackend {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SnapshotBackend for FailingBackend {
        async fn fetch_once(&self) -> anyhow::Result<(String, String)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("transient network error")
        }
    }

    struct SucceedingBackend;

    #[async_trait]
    impl SnapshotBackend for SucceedingBackend {
        async fn fetch_once(&self) -> anyhow::Result<(String, String)> {
            Ok(("live market brief".to_string(), "grok-4".to_string()))
        }
    }

    #[tokio::test]
    async fn falls_back_after_persistent_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = MarketSnapshotService::new(
            Box::new(FailingBackend {
                calls: calls.clone(),
            }),
            30,
        );
        let snapshot = service.get(false).await;
        assert!(snapshot.is_fallback);
        assert_eq!(snapshot.body, FALLBACK_BODY);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn caches_fresh_result() {
        let service = MarketSnapshotService::new(Box::new(SucceedingBackend), 30);
        let first = service.get(true).await;
        let second = service.get(true).await;
        assert_eq!(first, second);
        assert!(!second.is_fallback);
    }

    #[tokio::test]
    async fn use_cached_false_always_refetches() {
        let service = MarketSnapshotService::new(Box::new(SucceedingBackend), 30);
        let first = service.get(true).await;
        let second = service.get(false).await;
        assert_eq!(first.body, second.body);
        assert_ne!(first.generated_at, second.generated_at);
    }
}
