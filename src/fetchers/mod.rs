//! Content fetchers: pluggable producers of `ContentItem`s.
//!
//! A failing fetcher logs and contributes zero items; it never aborts the run (§7).

pub mod rss;
pub mod x;

use crate::model::{ContentItem, TimeWindow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Deadline applied to every fetcher call, independent of its own internal retries.
pub const FETCHER_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);

/// A pluggable source of `ContentItem`s for a given time window.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Display name, used in logs and to tag fetched items' `source_name` when the
    /// fetcher doesn't already know a per-item source.
    fn name(&self) -> &str;

    /// Fetch items published within `window`, honoring `cancel`.
    async fn fetch(&self, window: TimeWindow, cancel: &CancellationToken) -> anyhow::Result<Vec<ContentItem>>;
}

/// Run `fetcher` under the fixed deadline, logging and returning zero items on any
/// failure (timeout, network, parse) rather than propagating the error.
pub async fn fetch_with_deadline(
    fetcher: &dyn ContentFetcher,
    window: TimeWindow,
    cancel: &CancellationToken,
) -> Vec<ContentItem> {
    let name = fetcher.name().to_string();
    let result = tokio::time::timeout(FETCHER_DEADLINE, fetcher.fetch(window, cancel)).await;
    match result {
        Ok(Ok(items)) => items,
        Ok(Err(error)) => {
            tracing::warn!(source = %name, %error, "fetcher failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(source = %name, "fetcher exceeded deadline");
            Vec::new()
        }
    }
}
