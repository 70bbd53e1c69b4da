//! Process entrypoint: wires configuration, logging, and the CLI surface together.

use crypto_sentinel::analyzer::LLMAnalyzer;
use crypto_sentinel::categories::CategoryRegistry;
use crypto_sentinel::cli::{self, Commands, ConfigAction, RunMode, exit_code};
use crypto_sentinel::config::{FetcherConfig, SentinelConfig};
use crypto_sentinel::controller::{ExecutionController, RunFactory};
use crypto_sentinel::fetchers::ContentFetcher;
use crypto_sentinel::fetchers::rss::RssFetcher;
use crypto_sentinel::fetchers::x::XFetcher;
use crypto_sentinel::logger::{self, LogFormat};
use crypto_sentinel::market_snapshot::{HttpSnapshotBackend, MarketSnapshotService};
use crypto_sentinel::prompts::PromptAssembler;
use crypto_sentinel::repository::{InMemoryRepository, Repository};
use crypto_sentinel::runner::PipelineRunner;
use crypto_sentinel::scheduler::Scheduler;
use crypto_sentinel::structured_output::{HttpChatBackend, StructuredOutputClient};
use crypto_sentinel::telegram::TelegramClient;
use crypto_sentinel::telegram::delivery::TelegramDelivery;
use crypto_sentinel::telegram::listener::TelegramCommandListener;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default analysis-prompt template, used when no `prompts/analysis.md` file is present
/// alongside the config. Embeds the category bullets `CategoryRegistry` parses.
const DEFAULT_ANALYSIS_PROMPT: &str = "\
You are a crypto news analyst producing a structured daily brief.

Market context:
${Grok_Summary_Here}

Classify each item into exactly one of the following categories:
- **Truth:** on-chain facts and verifiable events
- **Speculation:** rumors, unconfirmed reports, and opinion
- **Macro:** broader economic or regulatory context
- **Ignored:** not relevant to crypto markets; never rendered

Respond only with the requested JSON object.
";

fn build_fetchers(configs: &[FetcherConfig]) -> Vec<Box<dyn ContentFetcher>> {
    configs
        .iter()
        .map(|config| -> Box<dyn ContentFetcher> {
            match config {
                FetcherConfig::Rss { name, urls } => Box::new(RssFetcher::new(name.clone(), urls.clone())),
                FetcherConfig::X {
                    name,
                    cli_path,
                    query,
                    extra_args,
                    cookie_token_env,
                } => {
                    let cookie_token = cookie_token_env.as_ref().and_then(|env| std::env::var(env).ok());
                    Box::new(XFetcher::new(
                        name.clone(),
                        cli_path.clone(),
                        query.clone(),
                        extra_args.clone(),
                        cookie_token,
                    ))
                }
            }
        })
        .collect()
}

fn build_runner(config: &SentinelConfig, registry: Arc<CategoryRegistry>) -> anyhow::Result<PipelineRunner> {
    let snapshot_backend = HttpSnapshotBackend::new(config.market_snapshot.clone())?;
    let snapshot_service = MarketSnapshotService::new(Box::new(snapshot_backend), config.market_snapshot.ttl_minutes);

    let prompt_assembler = PromptAssembler::new(DEFAULT_ANALYSIS_PROMPT.to_string(), chrono::Utc::now());

    let chat_backend = HttpChatBackend::new(config.llm.clone())?;
    let structured_client = StructuredOutputClient::new(Box::new(chat_backend), config.llm.provider, config.llm.max_tokens);

    let analyzer = LLMAnalyzer::new(
        snapshot_service,
        prompt_assembler,
        structured_client,
        registry.clone(),
        &config.llm,
    );

    let fetchers = build_fetchers(&config.fetchers);
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());

    let bot_token = SentinelConfig::resolve_api_key(&config.telegram.bot_token_env)?;
    let telegram_client = TelegramClient::new(bot_token)?;
    let delivery = TelegramDelivery::new(telegram_client, config.telegram.parse_mode.clone());

    Ok(PipelineRunner::new(
        fetchers,
        repository,
        analyzer,
        registry,
        delivery,
        config.telegram.chat_id.clone(),
        config.time_window_hours,
    ))
}

/// Build a `RunFactory` that constructs a fresh `PipelineRunner` for each triggered run.
///
/// A new runner is built per invocation rather than reused across runs: its analyzer and
/// snapshot service hold per-run caches that should not leak between independent runs.
fn run_factory(config: Arc<SentinelConfig>, registry: Arc<CategoryRegistry>) -> RunFactory {
    Arc::new(move |cancel: CancellationToken| {
        let config = config.clone();
        let registry = registry.clone();
        Box::pin(async move {
            let runner = build_runner(&config, registry).map_err(|error| error.to_string())?;
            runner.run(cancel).await
        })
    })
}

async fn run_once(config: SentinelConfig) -> i32 {
    let registry = Arc::new(CategoryRegistry::load_from_prompt(DEFAULT_ANALYSIS_PROMPT));
    match build_runner(&config, registry) {
        Ok(runner) => match runner.run(CancellationToken::new()).await {
            Ok(outcome) => {
                info!(item_counts = ?outcome.item_counts, "single run completed");
                exit_code::SUCCESS
            }
            Err(error) => {
                error!(%error, "single run failed");
                exit_code::RUNTIME_FAILURE
            }
        },
        Err(error) => {
            error!(%error, "failed to build pipeline runner");
            exit_code::RUNTIME_FAILURE
        }
    }
}

async fn run_schedule(config: SentinelConfig) -> i32 {
    let registry = Arc::new(CategoryRegistry::load_from_prompt(DEFAULT_ANALYSIS_PROMPT));
    let config = Arc::new(config);
    let controller = Arc::new(ExecutionController::new(std::time::Duration::from_secs(
        config.telegram_commands.execution_timeout_minutes * 60,
    )));
    let factory = run_factory(config.clone(), registry);

    let scheduler = Scheduler::new(
        controller.clone(),
        factory.clone(),
        std::time::Duration::from_secs(config.execution_interval_seconds),
        true,
    );

    let listener = if config.telegram_commands.enabled {
        match SentinelConfig::resolve_api_key(&config.telegram.bot_token_env).and_then(TelegramClient::new) {
            Ok(client) => Some(TelegramCommandListener::new(
                client,
                config.telegram_commands.clone(),
                controller.clone(),
                factory,
            )),
            Err(error) => {
                error!(%error, "failed to start telegram command listener");
                None
            }
        }
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    let scheduler_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = scheduler.run() => {},
                () = shutdown.cancelled() => scheduler.stop(),
            }
        })
    };
    let listener_handle = listener.map(|listener| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { listener.run(shutdown).await })
    });

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received, draining");
    shutdown.cancel();
    let _ = scheduler_handle.await;
    if let Some(handle) = listener_handle {
        let _ = handle.await;
    }
    controller.wait_idle().await;
    exit_code::SUCCESS
}

#[tokio::main]
async fn main() {
    let cli = cli::parse_args();
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    if let Err(error) = logger::init(format) {
        eprintln!("failed to initialize logging: {error}");
    }

    let code = match cli.command {
        Commands::Run { mode } => match SentinelConfig::load(&cli.config_path) {
            Ok(config) => match mode {
                RunMode::Once => run_once(config).await,
                RunMode::Schedule => run_schedule(config).await,
            },
            Err(error) => {
                error!(%error, "configuration invalid");
                exit_code::VALIDATION_FAILURE
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => match SentinelConfig::load(&cli.config_path) {
                Ok(config) => {
                    println!("{}", cli::render_config_summary(&config));
                    exit_code::SUCCESS
                }
                Err(error) => {
                    error!(%error, "configuration invalid");
                    exit_code::VALIDATION_FAILURE
                }
            },
            ConfigAction::Validate => match SentinelConfig::load(&cli.config_path) {
                Ok(_) => {
                    println!("configuration is valid");
                    exit_code::SUCCESS
                }
                Err(error) => {
                    error!(%error, "configuration invalid");
                    exit_code::VALIDATION_FAILURE
                }
            },
        },
    };

    std::process::exit(code);
}
