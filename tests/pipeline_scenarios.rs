//! End-to-end scenarios from §8 of the design, exercised against `PipelineRunner`
//! wired with in-memory/fake collaborators — no live network I/O.

use async_trait::async_trait;
use chrono::Utc;
use crypto_sentinel::analyzer::LLMAnalyzer;
use crypto_sentinel::categories::CategoryRegistry;
use crypto_sentinel::config::LlmConfig;
use crypto_sentinel::controller::{ExecutionController, RunOutcome};
use crypto_sentinel::fetchers::ContentFetcher;
use crypto_sentinel::market_snapshot::{MarketSnapshotService, SnapshotBackend};
use crypto_sentinel::model::{ContentItem, SourceType, TimeWindow, TriggerReason};
use crypto_sentinel::prompts::PromptAssembler;
use crypto_sentinel::providers::Provider;
use crypto_sentinel::repository::{InMemoryRepository, Repository};
use crypto_sentinel::runner::PipelineRunner;
use crypto_sentinel::structured_output::{ChatBackend, StructuredOutputClient};
use crypto_sentinel::telegram::TelegramClient;
use crypto_sentinel::telegram::delivery::TelegramDelivery;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

const PROMPT: &str = "\
- **Truth:** facts
- **Speculation:** rumors
";

struct FixedFetcher {
    items: Vec<ContentItem>,
}

#[async_trait]
impl ContentFetcher for FixedFetcher {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self, _window: TimeWindow, _cancel: &CancellationToken) -> anyhow::Result<Vec<ContentItem>> {
        Ok(self.items.clone())
    }
}

fn item(id: &str, url: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        title: "headline".to_string(),
        content: "body".to_string(),
        url: url.to_string(),
        publish_time: Utc::now(),
        source_name: "feed".to_string(),
        source_type: SourceType::Rss,
    }
}

struct FixedSnapshotBackend;

#[async_trait]
impl SnapshotBackend for FixedSnapshotBackend {
    async fn fetch_once(&self) -> anyhow::Result<(String, String)> {
        Ok(("calm markets".to_string(), "grok-4".to_string()))
    }
}

struct FixedChatBackend {
    response: String,
}

#[async_trait]
impl ChatBackend for FixedChatBackend {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}

fn build_analyzer(response: String) -> (LLMAnalyzer, Arc<CategoryRegistry>) {
    let registry = Arc::new(CategoryRegistry::load_from_prompt(PROMPT));
    let snapshot_service = MarketSnapshotService::new(Box::new(FixedSnapshotBackend), 30);
    let prompt_assembler = PromptAssembler::new(PROMPT.to_string(), Utc::now());
    let structured_client =
        StructuredOutputClient::new(Box::new(FixedChatBackend { response }), Provider::OpenAI, 4096);
    let llm_config = LlmConfig {
        provider: Provider::OpenAI,
        endpoint: String::new(),
        model: "gpt-5.1".to_string(),
        api_key_env: "UNUSED".to_string(),
        temperature: 0.3,
        max_tokens: 4096,
        batch_size: 10,
        max_batch_parallelism: 2,
    };
    let analyzer = LLMAnalyzer::new(
        snapshot_service,
        prompt_assembler,
        structured_client,
        registry.clone(),
        &llm_config,
    );
    (analyzer, registry)
}

fn noop_delivery() -> TelegramDelivery {
    let client = TelegramClient::new("test-token".to_string()).expect("client builds without network I/O");
    TelegramDelivery::new(client, "Markdown".to_string())
}

#[tokio::test]
async fn scenario_a_happy_path_persists_filtered_results() {
    let items = vec![
        item("1", "https://a.example"),
        item("2", "https://b.example"),
        item("3", "https://c.example"),
    ];
    let response = r#"{"results": [
        {"time": "2026-07-31 00:00", "category": "Truth", "weight_score": 90, "summary": "s1", "source": "https://a.example"},
        {"time": "2026-07-31 00:00", "category": "Speculation", "weight_score": 40, "summary": "s2", "source": "https://b.example"}
    ]}"#;
    let (analyzer, registry) = build_analyzer(response.to_string());
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let runner = PipelineRunner::new(
        vec![Box::new(FixedFetcher { items })],
        repository.clone(),
        analyzer,
        registry,
        noop_delivery(),
        "chat-1".to_string(),
        24,
    );

    let outcome = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.item_counts.fetched, 3);
    assert_eq!(outcome.item_counts.analyzed, 2);

    let window = TimeWindow::trailing_hours(Utc::now(), 24);
    let unanalyzed = repository.list_unanalyzed_items(window).await.unwrap();
    assert_eq!(unanalyzed.len(), 1); // item 3 was never classified
}

#[tokio::test]
async fn scenario_b_snapshot_failure_still_succeeds_with_fallback() {
    struct FailingSnapshotBackend {
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl SnapshotBackend for FailingSnapshotBackend {
        async fn fetch_once(&self) -> anyhow::Result<(String, String)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("network down")
        }
    }

    let registry = Arc::new(CategoryRegistry::load_from_prompt(PROMPT));
    let calls = Arc::new(AtomicUsize::new(0));
    let snapshot_service = MarketSnapshotService::new(Box::new(FailingSnapshotBackend { calls: calls.clone() }), 30);
    let prompt_assembler = PromptAssembler::new(PROMPT.to_string(), Utc::now());
    let structured_client = StructuredOutputClient::new(
        Box::new(FixedChatBackend {
            response: r#"{"results": []}"#.to_string(),
        }),
        Provider::OpenAI,
        4096,
    );
    let llm_config = LlmConfig {
        provider: Provider::OpenAI,
        endpoint: String::new(),
        model: "gpt-5.1".to_string(),
        api_key_env: "UNUSED".to_string(),
        temperature: 0.3,
        max_tokens: 4096,
        batch_size: 10,
        max_batch_parallelism: 2,
    };
    let analyzer = LLMAnalyzer::new(snapshot_service, prompt_assembler, structured_client, registry.clone(), &llm_config);

    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let runner = PipelineRunner::new(
        vec![Box::new(FixedFetcher {
            items: vec![item("1", "https://a.example")],
        })],
        repository,
        analyzer,
        registry,
        noop_delivery(),
        "chat-1".to_string(),
        24,
    );

    let outcome = runner.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.item_counts.fetched, 1);
    assert!(calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn scenario_c_busy_rejection_allows_exactly_one_run() {
    let controller = Arc::new(ExecutionController::new(std::time::Duration::from_secs(30 * 60)));
    let first = controller
        .trigger(TriggerReason::Scheduled, |_cancel| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                Ok(RunOutcome {
                    partial_delivery: false,
                    item_counts: crypto_sentinel::model::ItemCounts::default(),
                })
            })
        })
        .await;
    let second = controller
        .trigger(TriggerReason::Command, |_cancel| {
            Box::pin(async move {
                Ok(RunOutcome {
                    partial_delivery: false,
                    item_counts: crypto_sentinel::model::ItemCounts::default(),
                })
            })
        })
        .await;

    assert_eq!(first, crypto_sentinel::errors::TriggerOutcome::Accepted);
    assert_eq!(second, crypto_sentinel::errors::TriggerOutcome::RejectedBusy);
    controller.wait_idle().await;
    assert_eq!(controller.status().latest_run.unwrap().run_id, 1);
}

#[tokio::test]
async fn scenario_d_watchdog_times_out_blocked_run() {
    let controller = Arc::new(ExecutionController::new(std::time::Duration::from_millis(200)));
    controller
        .trigger(TriggerReason::Manual, |_cancel| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok(RunOutcome {
                    partial_delivery: false,
                    item_counts: crypto_sentinel::model::ItemCounts::default(),
                })
            })
        })
        .await;

    let start = std::time::Instant::now();
    controller.wait_idle().await;
    assert!(start.elapsed() < std::time::Duration::from_secs(2));
    let status = controller.status();
    assert_eq!(status.latest_run.unwrap().state, crypto_sentinel::model::RunState::TimedOut);
}

#[tokio::test]
async fn scenario_e_dynamic_category_discovery_is_rendered() {
    let response = r#"{"results": [
        {"time": "2026-07-31 00:00", "category": "NewVertical", "weight_score": 70, "summary": "s1", "source": "https://a.example"}
    ]}"#;
    let (analyzer, registry) = build_analyzer(response.to_string());
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let runner = PipelineRunner::new(
        vec![Box::new(FixedFetcher {
            items: vec![item("1", "https://a.example")],
        })],
        repository,
        analyzer,
        registry.clone(),
        noop_delivery(),
        "chat-1".to_string(),
        24,
    );
    runner.run(CancellationToken::new()).await.unwrap();

    let all = registry.all_ordered();
    assert!(all.iter().any(|def| def.key == "NewVertical"));
}
