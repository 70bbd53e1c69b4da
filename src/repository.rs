//! Content/result/run storage, standing in for the embedded store described in §6.

use crate::model::{AnalysisResult, ContentItem, RunRecord, TimeWindow};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Persistence boundary for fetched items, analysis results, and run records.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Upsert items by `id`; repeated calls with the same item are no-ops.
    async fn upsert_items(&self, items: Vec<ContentItem>) -> anyhow::Result<()>;

    /// List items within `window` that have no stored result yet.
    async fn list_unanalyzed_items(&self, window: TimeWindow) -> anyhow::Result<Vec<ContentItem>>;

    /// Upsert results by `source_item_id`; repeated calls with the same id overwrite.
    async fn store_results(&self, results: Vec<AnalysisResult>) -> anyhow::Result<()>;

    /// Insert or update a run record by `run_id`.
    async fn upsert_run(&self, run: RunRecord) -> anyhow::Result<()>;

    /// Fetch the most recently started run record, if any.
    async fn latest_run(&self) -> anyhow::Result<Option<RunRecord>>;
}

#[derive(Default)]
struct Tables {
    items: HashMap<String, ContentItem>,
    results: HashMap<String, AnalysisResult>,
    runs: HashMap<u64, RunRecord>,
}

/// `parking_lot::Mutex`-guarded in-process repository; the default implementation
/// wired by `PipelineRunner` when no durable backend is configured.
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn upsert_items(&self, items: Vec<ContentItem>) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        for item in items {
            tables.items.insert(item.id.clone(), item);
        }
        Ok(())
    }

    async fn list_unanalyzed_items(&self, window: TimeWindow) -> anyhow::Result<Vec<ContentItem>> {
        let tables = self.tables.lock();
        let unanalyzed = tables
            .items
            .values()
            .filter(|item| window.contains(item.publish_time))
            .filter(|item| !tables.results.contains_key(&item.id))
            .cloned()
            .collect();
        Ok(unanalyzed)
    }

    async fn store_results(&self, results: Vec<AnalysisResult>) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        for result in results {
            tables.results.insert(result.source_item_id.clone(), result);
        }
        Ok(())
    }

    async fn upsert_run(&self, run: RunRecord) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        tables.runs.insert(run.run_id, run);
        Ok(())
    }

    async fn latest_run(&self) -> anyhow::Result<Option<RunRecord>> {
        let tables = self.tables.lock();
        Ok(tables.runs.values().max_by_key(|r| r.run_id).cloned())
    }
}
