//! Command-line interface.
//!
//! Grounded on the teacher's `Cli`/`Commands` derive split and `get_styles()` helper in
//! `cli.rs`; subcommands replaced with this pipeline's `run`/`config` surface (§4.14).

use crate::config::SentinelConfig;
use clap::builder::{Styles, styling::AnsiColor};
use clap::{Parser, Subcommand, crate_version};

/// Top-level CLI definition.
#[derive(Parser)]
#[command(
    author,
    version = crate_version!(),
    about = "Crypto-Sentinel: automated crypto-news intelligence pipeline",
    styles = get_styles(),
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file.
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        default_value = "config.toml",
        help = "Path to the configuration file"
    )]
    pub config_path: String,

    /// Emit logs as newline-delimited JSON instead of human-readable text.
    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,
}

/// Execution mode for the `run` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Execute one pipeline pass and exit.
    Once,
    /// Start the scheduler and the Telegram command listener; run until signaled.
    Schedule,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Execute the pipeline, once or on a recurring schedule.
    Run {
        /// Whether to run a single pass or start the long-running scheduler.
        #[arg(long, value_enum, default_value = "once")]
        mode: RunMode,
    },

    /// Inspect or update the on-disk configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommand actions.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (secrets resolved from env, not echoed).
    Show,
    /// Validate the configuration file without running the pipeline.
    Validate,
}

/// Custom styling, matching the teacher's `get_styles()`.
fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Magenta.on_default().bold())
        .usage(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Green.on_default().bold())
        .placeholder(AnsiColor::Yellow.on_default())
        .valid(AnsiColor::Blue.on_default().bold())
        .invalid(AnsiColor::Red.on_default().bold())
        .error(AnsiColor::Red.on_default().bold())
}

/// Parse command-line arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process exit codes per §4.14.
pub mod exit_code {
    /// Successful completion.
    pub const SUCCESS: i32 = 0;
    /// A runtime failure occurred (network, delivery, analysis).
    pub const RUNTIME_FAILURE: i32 = 1;
    /// The configuration failed validation before any work started.
    pub const VALIDATION_FAILURE: i32 = 2;
}

/// Render a loaded configuration for `config show`, omitting any secret values.
pub fn render_config_summary(config: &SentinelConfig) -> String {
    format!(
        "time_window_hours = {}\nexecution_interval_seconds = {}\nllm.provider = {}\nllm.model = {}\nmarket_snapshot.provider = {}\nmarket_snapshot.model = {}\ntelegram.chat_id = {}\ntelegram_commands.enabled = {}\nfetchers = {:?}\nstorage.path = {}\n",
        config.time_window_hours,
        config.execution_interval_seconds,
        config.llm.provider,
        config.llm.model,
        config.market_snapshot.provider,
        config.market_snapshot.model,
        config.telegram.chat_id,
        config.telegram_commands.enabled,
        config.fetcher_counts(),
        config.storage.path,
    )
}
