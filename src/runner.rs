//! Wires fetchers, repository, analyzer, renderer, and delivery into one run (§4.10).

use crate::analyzer::LLMAnalyzer;
use crate::categories::CategoryRegistry;
use crate::controller::RunOutcome;
use crate::fetchers::{ContentFetcher, fetch_with_deadline};
use crate::model::{ItemCounts, TimeWindow};
use crate::render::render_report;
use crate::repository::Repository;
use crate::telegram::delivery::TelegramDelivery;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// One end-to-end pipeline execution: fetch → dedup/upsert → analyze → persist →
/// render → deliver.
pub struct PipelineRunner {
    fetchers: Vec<Box<dyn ContentFetcher>>,
    repository: Arc<dyn Repository>,
    analyzer: LLMAnalyzer,
    registry: Arc<CategoryRegistry>,
    delivery: TelegramDelivery,
    chat_id: String,
    time_window_hours: i64,
}

impl PipelineRunner {
    /// Build a runner from its wired collaborators.
    pub fn new(
        fetchers: Vec<Box<dyn ContentFetcher>>,
        repository: Arc<dyn Repository>,
        analyzer: LLMAnalyzer,
        registry: Arc<CategoryRegistry>,
        delivery: TelegramDelivery,
        chat_id: String,
        time_window_hours: i64,
    ) -> Self {
        Self {
            fetchers,
            repository,
            analyzer,
            registry,
            delivery,
            chat_id,
            time_window_hours,
        }
    }

    /// Execute one full run, honoring `cancel` at each checkpoint named in §4.10.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, String> {
        let window = TimeWindow::trailing_hours(Utc::now(), self.time_window_hours);

        let mut deduped = HashMap::new();
        for fetcher in &self.fetchers {
            if cancel.is_cancelled() {
                return Err("cancelled before all fetchers completed".to_string());
            }
            let items = fetch_with_deadline(fetcher.as_ref(), window, &cancel).await;
            for item in items {
                deduped.entry(item.id.clone()).or_insert(item);
            }
        }
        let fetched_count = deduped.len();

        self.repository
            .upsert_items(deduped.into_values().collect())
            .await
            .map_err(|error| format!("upsert_items failed: {error}"))?;

        let unanalyzed = self
            .repository
            .list_unanalyzed_items(window)
            .await
            .map_err(|error| format!("list_unanalyzed_items failed: {error}"))?;

        let analysis_results = self.analyzer.analyze(unanalyzed, &cancel).await;
        let analyzed_count = analysis_results.len();

        self.repository
            .store_results(analysis_results.clone())
            .await
            .map_err(|error| format!("store_results failed: {error}"))?;

        if cancel.is_cancelled() {
            return Err("cancelled before render".to_string());
        }
        let report = render_report(&analysis_results, &self.registry);

        if cancel.is_cancelled() {
            return Err("cancelled before delivery".to_string());
        }
        let delivery_outcome = self.delivery.deliver(&report, &self.chat_id, &cancel).await;

        let item_counts = ItemCounts {
            fetched: fetched_count,
            analyzed: analyzed_count,
            delivered: delivery_outcome.chunks_delivered,
        };
        info!(?item_counts, partial_delivery = delivery_outcome.partial_delivery, "run finished");

        if !delivery_outcome.succeeded && delivery_outcome.chunks_delivered == 0 {
            return Err("delivery failed: no chunk delivered".to_string());
        }

        Ok(RunOutcome {
            partial_delivery: delivery_outcome.partial_delivery,
            item_counts,
        })
    }
}
