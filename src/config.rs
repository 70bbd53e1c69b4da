//! Configuration management for Crypto-Sentinel.
//!
//! Loads a single TOML file (default `config.toml`, overridable via `--config`), applying
//! `serde` defaults for every optional key. Grounded on the teacher's `Config::load` /
//! `Config::validate` layering in `config.rs`, adapted from git-iris's personal+project
//! overlay to this system's single-file-plus-environment-indirection model (§6).

use crate::providers::Provider;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_time_window_hours() -> i64 {
    24
}
fn default_execution_interval_seconds() -> u64 {
    3600
}
fn default_batch_size() -> usize {
    10
}
fn default_max_batch_parallelism() -> usize {
    2
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u64 {
    4096
}
fn default_snapshot_ttl_minutes() -> i64 {
    30
}
fn default_parse_mode() -> String {
    "Markdown".to_string()
}
fn default_execution_timeout_minutes() -> u64 {
    30
}
fn default_max_concurrent_executions() -> usize {
    1
}
fn default_retention_days() -> i64 {
    30
}
fn default_storage_path() -> String {
    "sentinel.db".to_string()
}

/// Root configuration, matching the shape documented in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Trailing window considered "recent" for fetches and unanalyzed-item queries.
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: i64,
    /// Scheduler tick interval.
    #[serde(default = "default_execution_interval_seconds")]
    pub execution_interval_seconds: u64,
    /// Structured-analysis LLM configuration.
    pub llm: LlmConfig,
    /// Market-snapshot LLM configuration.
    pub market_snapshot: MarketSnapshotConfig,
    /// Telegram delivery configuration.
    pub telegram: TelegramConfig,
    /// Telegram on-demand command configuration.
    #[serde(default)]
    pub telegram_commands: TelegramCommandsConfig,
    /// Configured content fetchers.
    #[serde(default)]
    pub fetchers: Vec<FetcherConfig>,
    /// Embedded-store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Structured-analysis LLM configuration (§6 `llm`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which provider defaults to resolve endpoint/context-window/api-key-env from.
    pub provider: Provider,
    /// Chat-completions endpoint; defaults to the provider's default endpoint.
    #[serde(default)]
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max output tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Items per analysis batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Max number of batches dispatched concurrently.
    #[serde(default = "default_max_batch_parallelism")]
    pub max_batch_parallelism: usize,
}

impl LlmConfig {
    /// Resolve the effective endpoint, falling back to the provider's default.
    pub fn effective_endpoint(&self) -> &str {
        if self.endpoint.is_empty() {
            self.provider.default_endpoint()
        } else {
            &self.endpoint
        }
    }
}

/// Market-snapshot LLM configuration (§6 `market_snapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshotConfig {
    /// Provider to use for the web-browsing snapshot call.
    #[serde(default)]
    pub provider: Provider,
    /// Endpoint; defaults to the provider's default endpoint.
    #[serde(default)]
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Cache TTL in minutes.
    #[serde(default = "default_snapshot_ttl_minutes")]
    pub ttl_minutes: i64,
}

impl MarketSnapshotConfig {
    /// Resolve the effective endpoint, falling back to the provider's default.
    pub fn effective_endpoint(&self) -> &str {
        if self.endpoint.is_empty() {
            self.provider.default_endpoint()
        } else {
            &self.endpoint
        }
    }
}

/// Telegram delivery configuration (§6 `telegram`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Name of the environment variable holding the bot token.
    pub bot_token_env: String,
    /// Destination chat id for scheduled/command reports.
    pub chat_id: String,
    /// Telegram `parse_mode`; always `"Markdown"` per §6.
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

/// One authorized Telegram user entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    /// Platform user id (opaque string; Telegram ids are numeric but unbounded in practice).
    pub user_id: String,
    /// Display username, for logs only.
    #[serde(default)]
    pub username: String,
    /// Permissions granted to this user.
    pub permissions: Vec<String>,
}

impl AuthorizedUser {
    /// Whether this user may invoke `permission` (one of `"run"`, `"status"`, `"help"`).
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Token-bucket rate limit configuration for `/run`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommandRateLimit {
    /// Maximum accepted commands per rolling hour.
    pub max_commands_per_hour: u32,
    /// Minimum spacing between two accepted `/run` invocations.
    pub cooldown_minutes: u32,
}

impl Default for CommandRateLimit {
    fn default() -> Self {
        Self {
            max_commands_per_hour: 4,
            cooldown_minutes: 10,
        }
    }
}

/// Telegram on-demand command configuration (§6 `telegram_commands`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramCommandsConfig {
    /// Whether the command listener runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Authorization table.
    #[serde(default)]
    pub authorized_users: Vec<AuthorizedUser>,
    /// Per-run watchdog timeout, applied to every run regardless of trigger reason.
    #[serde(default = "default_execution_timeout_minutes")]
    pub execution_timeout_minutes: u64,
    /// Always 1 in this single-node design; kept for config-shape fidelity with §6.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    /// Per-user rate limit.
    #[serde(default)]
    pub command_rate_limit: CommandRateLimit,
}

impl Default for TelegramCommandsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            authorized_users: Vec::new(),
            execution_timeout_minutes: default_execution_timeout_minutes(),
            max_concurrent_executions: default_max_concurrent_executions(),
            command_rate_limit: CommandRateLimit::default(),
        }
    }
}

impl TelegramCommandsConfig {
    /// Find the authorized-user entry for `user_id`, if any.
    pub fn find_user(&self, user_id: &str) -> Option<&AuthorizedUser> {
        self.authorized_users.iter().find(|u| u.user_id == user_id)
    }
}

/// One configured content fetcher (§6 `fetchers`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FetcherConfig {
    /// An RSS/Atom feed fetcher.
    Rss {
        /// Display name for this source.
        name: String,
        /// Feed URLs to poll.
        urls: Vec<String>,
    },
    /// An X/Twitter fetcher driven by an external CLI.
    X {
        /// Display name for this source.
        name: String,
        /// Path to the external CLI binary.
        cli_path: String,
        /// Search query passed to the CLI.
        query: String,
        /// Extra arguments appended verbatim.
        #[serde(default)]
        extra_args: Vec<String>,
        /// Name of the environment variable holding a session/cookie token, if required.
        #[serde(default)]
        cookie_token_env: Option<String>,
    },
}

impl FetcherConfig {
    /// Display name, used in logs and for per-source failure isolation.
    pub fn name(&self) -> &str {
        match self {
            Self::Rss { name, .. } | Self::X { name, .. } => name,
        }
    }
}

/// Embedded-store configuration (§6 `storage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the embedded store file.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Retention window in days (informational; enforcement is the store's concern).
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl SentinelConfig {
    /// Load and validate configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// Resolve an API key from its named environment variable.
    pub fn resolve_api_key(env_var: &str) -> Result<String> {
        std::env::var(env_var)
            .with_context(|| format!("environment variable {env_var} is not set"))
    }

    /// Validate the configuration per §4.11; returns `ConfigInvalid`-flavored errors.
    pub fn validate(&self) -> Result<()> {
        if self.fetchers.is_empty() {
            return Err(anyhow!("at least one fetcher must be configured"));
        }
        if self.llm.model.is_empty() {
            return Err(anyhow!("llm.model must not be empty"));
        }
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(anyhow!(
                "environment variable {} (llm.api_key_env) is not set",
                self.llm.api_key_env
            ));
        }
        if self.market_snapshot.model.is_empty() {
            return Err(anyhow!("market_snapshot.model must not be empty"));
        }
        if std::env::var(&self.market_snapshot.api_key_env).is_err() {
            return Err(anyhow!(
                "environment variable {} (market_snapshot.api_key_env) is not set",
                self.market_snapshot.api_key_env
            ));
        }
        if std::env::var(&self.telegram.bot_token_env).is_err() {
            return Err(anyhow!(
                "environment variable {} (telegram.bot_token_env) is not set",
                self.telegram.bot_token_env
            ));
        }
        if self.telegram.chat_id.is_empty() {
            return Err(anyhow!("telegram.chat_id must not be empty"));
        }
        if self.telegram_commands.enabled
            && self.telegram_commands.command_rate_limit.max_commands_per_hour == 0
        {
            return Err(anyhow!(
                "telegram_commands.command_rate_limit.max_commands_per_hour must be positive"
            ));
        }
        Ok(())
    }

    /// Group fetcher configs by their discriminant for reporting/debugging.
    pub fn fetcher_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for fetcher in &self.fetchers {
            let key = match fetcher {
                FetcherConfig::Rss { .. } => "rss",
                FetcherConfig::X { .. } => "x",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            time_window_hours = 24
            execution_interval_seconds = 3600

            [llm]
            provider = "openai"
            model = "gpt-5.1"
            api_key_env = "SENTINEL_TEST_LLM_KEY"

            [market_snapshot]
            provider = "xai"
            model = "grok-4"
            api_key_env = "SENTINEL_TEST_SNAPSHOT_KEY"

            [telegram]
            bot_token_env = "SENTINEL_TEST_BOT_TOKEN"
            chat_id = "12345"

            [[fetchers]]
            kind = "rss"
            name = "coindesk"
            urls = ["https://example.com/feed.xml"]
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: SentinelConfig = toml::from_str(sample_toml()).expect("parse");
        assert_eq!(config.time_window_hours, 24);
        assert_eq!(config.llm.batch_size, 10);
        assert_eq!(config.llm.max_batch_parallelism, 2);
        assert_eq!(config.market_snapshot.ttl_minutes, 30);
        assert_eq!(config.telegram.parse_mode, "Markdown");
        assert!(!config.telegram_commands.enabled);
        assert_eq!(config.storage.path, "sentinel.db");
    }

    #[test]
    fn validate_fails_without_fetchers() {
        let mut config: SentinelConfig = toml::from_str(sample_toml()).expect("parse");
        config.fetchers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(unsafe_code)]
    fn validate_fails_when_env_var_missing() {
        unsafe {
            std::env::remove_var("SENTINEL_TEST_LLM_KEY_MISSING");
        }
        let mut config: SentinelConfig = toml::from_str(sample_toml()).expect("parse");
        config.llm.api_key_env = "SENTINEL_TEST_LLM_KEY_MISSING".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(unsafe_code)]
    fn validate_succeeds_when_env_vars_present() {
        unsafe {
            std::env::set_var("SENTINEL_TEST_LLM_KEY", "key");
            std::env::set_var("SENTINEL_TEST_SNAPSHOT_KEY", "key");
            std::env::set_var("SENTINEL_TEST_BOT_TOKEN", "token");
        }
        let config: SentinelConfig = toml::from_str(sample_toml()).expect("parse");
        assert!(config.validate().is_ok());
        unsafe {
            std::env::remove_var("SENTINEL_TEST_LLM_KEY");
            std::env::remove_var("SENTINEL_TEST_SNAPSHOT_KEY");
            std::env::remove_var("SENTINEL_TEST_BOT_TOKEN");
        }
    }

    #[test]
    fn effective_endpoint_falls_back_to_provider_default() {
        let config: SentinelConfig = toml::from_str(sample_toml()).expect("parse");
        assert_eq!(
            config.llm.effective_endpoint(),
            Provider::OpenAI.default_endpoint()
        );
    }
}
