//! The four-step LLM analysis pipeline: snapshot → prompt assembly → batching → dispatch.

use crate::categories::CategoryRegistry;
use crate::config::LlmConfig;
use crate::errors::AnalysisFailedKind;
use crate::market_snapshot::MarketSnapshotService;
use crate::model::{AnalysisResult, ContentItem, IGNORED_CATEGORY};
use crate::prompts::PromptAssembler;
use crate::structured_output::StructuredOutputClient;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Serialize)]
struct BatchItemView<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
    url: &'a str,
    publish_time: chrono::DateTime<chrono::Utc>,
    source_name: &'a str,
    source_type: &'static str,
}

/// Orchestrates snapshot retrieval, prompt assembly, batching, and per-batch dispatch.
pub struct LLMAnalyzer {
    snapshot_service: MarketSnapshotService,
    prompt_assembler: PromptAssembler,
    structured_client: StructuredOutputClient,
    registry: std::sync::Arc<CategoryRegistry>,
    batch_size: usize,
    max_batch_parallelism: usize,
}

impl LLMAnalyzer {
    /// Construct an analyzer from its collaborators and the configured batch shape.
    pub fn new(
        snapshot_service: MarketSnapshotService,
        prompt_assembler: PromptAssembler,
        structured_client: StructuredOutputClient,
        registry: std::sync::Arc<CategoryRegistry>,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            snapshot_service,
            prompt_assembler,
            structured_client,
            registry,
            batch_size: llm_config.batch_size.max(1),
            max_batch_parallelism: llm_config.max_batch_parallelism.max(1),
        }
    }

    /// Run the full pipeline over `items`, returning a stably-sorted result list.
    ///
    /// Empty input short-circuits before any LLM call (no snapshot, no dispatch).
    #[instrument(skip(self, items, cancel))]
    pub async fn analyze(
        &self,
        items: Vec<ContentItem>,
        cancel: &CancellationToken,
    ) -> Vec<AnalysisResult> {
        if items.is_empty() {
            return Vec::new();
        }

        let snapshot = self.snapshot_service.get(true).await;
        let system_prompt = self.prompt_assembler.assemble(&snapshot.body, snapshot.generated_at);

        let batches: Vec<Vec<ContentItem>> = items
            .chunks(self.batch_size)
            .map(<[ContentItem]>::to_vec)
            .collect();

        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(self.max_batch_parallelism));
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = semaphore.clone();
            let system_prompt = system_prompt.clone();
            let permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let result = self.dispatch_batch(&system_prompt, &batch).await;
            drop(permit);
            handles.push(result);
        }

        let mut merged: Vec<AnalysisResult> = handles.into_iter().flatten().collect();

        let mut seen_categories = HashSet::new();
        for result in &merged {
            if seen_categories.insert(result.category.clone()) {
                self.registry.record_seen(&result.category);
            }
        }

        merged.retain(|r| r.category != IGNORED_CATEGORY);
        merged.sort_by(|a, b| {
            b.weight_score
                .cmp(&a.weight_score)
                .then_with(|| b.time.cmp(&a.time))
                .then_with(|| a.source_item_id.cmp(&b.source_item_id))
        });
        merged
    }

    /// Dispatch one batch, splitting it in half and retrying each half when the
    /// structured client reports `ContextOverflow` (§4.4/§7). A single-item batch that
    /// still overflows is unsplittable and is dropped.
    fn dispatch_batch<'a>(
        &'a self,
        system_prompt: &'a str,
        batch: &'a [ContentItem],
    ) -> Pin<Box<dyn Future<Output = Vec<AnalysisResult>> + Send + 'a>> {
        Box::pin(async move {
            let input_urls: HashSet<&str> = batch.iter().map(|item| item.url.as_str()).collect();
            let view: Vec<BatchItemView<'_>> = batch
                .iter()
                .map(|item| BatchItemView {
                    id: &item.id,
                    title: &item.title,
                    content: &item.content,
                    url: &item.url,
                    publish_time: item.publish_time,
                    source_name: &item.source_name,
                    source_type: item.source_type.as_str(),
                })
                .collect();
            let user_prompt = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(error) => {
                    warn!(%error, "failed to serialize batch, skipping");
                    return Vec::new();
                }
            };

            match self.structured_client.analyze(system_prompt, &user_prompt).await {
                Ok(batch_result) => post_process(batch_result, batch, &input_urls),
                Err(error) if error.kind == AnalysisFailedKind::ContextOverflow && batch.len() > 1 => {
                    warn!(batch_len = batch.len(), "context overflow, splitting batch and retrying");
                    let mid = batch.len() / 2;
                    let (left, right) = batch.split_at(mid);
                    let (mut left_results, right_results) = tokio::join!(
                        self.dispatch_batch(system_prompt, left),
                        self.dispatch_batch(system_prompt, right)
                    );
                    left_results.extend(right_results);
                    left_results
                }
                Err(error) => {
                    warn!(kind = %error.kind, detail = %error.detail, "batch analysis failed, skipping batch");
                    Vec::new()
                }
            }
        })
    }
}

fn post_process(
    batch_result: crate::structured_output::BatchAnalysisResult,
    batch: &[ContentItem],
    input_urls: &HashSet<&str>,
) -> Vec<AnalysisResult> {
    let mut out = Vec::with_capacity(batch_result.results.len());
    for raw in batch_result.results {
        // Anti-hallucination guard: drop any result whose source wasn't in this batch.
        if !input_urls.contains(raw.source.as_str()) {
            continue;
        }
        let Ok(weight_score) = u8::try_from(raw.weight_score.clamp(0, 100)) else {
            continue;
        };
        let Some(source_item) = batch.iter().find(|item| item.url == raw.source) else {
            continue;
        };
        out.push(AnalysisResult {
            time: raw.time,
            category: raw.category,
            weight_score,
            summary: raw.summary,
            source: raw.source,
            source_item_id: source_item.id.clone(),
        });
    }
    info!(count = out.len(), "batch post-processed");
    out
}
