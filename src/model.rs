//! Core data model shared across fetchers, the analyzer, the repository, and the renderer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How long a `ContentItem::publish_time` is allowed to sit in the future before it is
/// considered invalid (clock skew between a feed's server and ours).
pub const ALLOWED_CLOCK_SKEW: Duration = Duration::minutes(5);

/// Where a `ContentItem` originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// An RSS/Atom feed.
    Rss,
    /// An X/Twitter query, fetched through an external CLI.
    X,
}

impl SourceType {
    /// Stable short name used in fingerprints and persisted rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::X => "x",
        }
    }
}

/// A single normalized unit of ingested content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable fingerprint derived from source + canonical URL + publish time.
    pub id: String,
    /// Headline or tweet-equivalent title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Canonical link; never empty.
    pub url: String,
    /// UTC publish timestamp.
    pub publish_time: DateTime<Utc>,
    /// Human-readable source name, e.g. feed title or X handle.
    pub source_name: String,
    /// Tagged origin.
    pub source_type: SourceType,
}

impl ContentItem {
    /// Compute the stable fingerprint `id` for a `(source, url, publish_time)` triple.
    ///
    /// Grounded on the teacher's use of stable hashing for deterministic identifiers
    /// (`providers.rs`'s deterministic-by-key synthesis pattern) — here a `Sha256` over
    /// the three fields keeps fingerprints stable across process restarts.
    pub fn fingerprint(source_name: &str, url: &str, publish_time: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
        hasher.update(b"\0");
        hasher.update(publish_time.timestamp().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Validate the invariants from §3: non-empty URL and a publish time not unreasonably
    /// far in the future.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.url.is_empty() && self.publish_time <= now + ALLOWED_CLOCK_SKEW
    }
}

/// A textual market brief produced by a web-browsing LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// When this snapshot was produced (or, for a fallback, when the fallback was built).
    pub generated_at: DateTime<Utc>,
    /// Multi-section body text; may contain URLs that must be preserved verbatim.
    pub body: String,
    /// Name of the model that produced the snapshot.
    pub source_model: String,
    /// True if this is a degraded fallback rather than a live snapshot.
    pub is_fallback: bool,
}

/// One LLM-produced classification, score, and summary for a surviving `ContentItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Display string derived from the source item's publish time.
    pub time: String,
    /// Free-form category key, discovered at runtime via the `CategoryRegistry`.
    pub category: String,
    /// Importance score in `[0, 100]`.
    pub weight_score: u8,
    /// Concise summary.
    pub summary: String,
    /// Source URL; must equal the `url` of some input `ContentItem` in the same run.
    pub source: String,
    /// Fingerprint of the originating `ContentItem`.
    pub source_item_id: String,
}

/// The sentinel category value meaning "drop this item, never render it".
pub const IGNORED_CATEGORY: &str = "Ignored";

/// A time window `[start, end]` used to scope fetches and unanalyzed-item queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build the trailing window `[now - hours, now]`.
    pub fn trailing_hours(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: now - Duration::hours(hours),
            end: now,
        }
    }

    /// Whether `timestamp` falls within this window (inclusive).
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Why a pipeline run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    /// Fired by the `Scheduler` on its fixed interval.
    Scheduled,
    /// Fired by a `/run` Telegram command.
    Command,
    /// Fired directly, e.g. `run --mode=once` from the CLI.
    Manual,
}

/// Lifecycle state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted, worker not yet started.
    Pending,
    /// Worker actively executing the pipeline.
    Running,
    /// Completed without error.
    Succeeded,
    /// Completed with an unrecoverable error.
    Failed,
    /// The watchdog cancelled the run.
    TimedOut,
    /// Cancellation was requested and observed.
    Cancelled,
}

/// Fetched/analyzed/delivered counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    /// Items fetched across all sources (pre-dedup).
    pub fetched: usize,
    /// Items that survived filtering and produced an `AnalysisResult`.
    pub analyzed: usize,
    /// Items rendered into chunks that were actually delivered.
    pub delivered: usize,
}

/// One execution record tracked by the `ExecutionController`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Monotonically increasing identifier.
    pub run_id: u64,
    /// What triggered this run.
    pub trigger: TriggerReason,
    /// When the run was accepted.
    pub started_at: DateTime<Utc>,
    /// When the run finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub state: RunState,
    /// Error description, if the run did not succeed.
    pub error: Option<String>,
    /// True if some but not all delivery chunks succeeded.
    pub partial_delivery: bool,
    /// Item counters.
    pub item_counts: ItemCounts,
}

impl RunRecord {
    /// Start a new record in the `Pending` state.
    pub fn new(run_id: u64, trigger: TriggerReason, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            trigger,
            started_at,
            finished_at: None,
            state: RunState::Pending,
            error: None,
            partial_delivery: false,
            item_counts: ItemCounts::default(),
        }
    }
}

/// A Telegram command as received from the wire, before authorization/rate-limit checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Trigger a pipeline run.
    Run,
    /// Report the current run status.
    Status,
    /// List available commands.
    Help,
}

impl CommandKind {
    /// Parse a raw command token such as `/run` or `/run@botname`.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let token = token.split('@').next().unwrap_or(token);
        match token {
            "/run" => Some(Self::Run),
            "/status" => Some(Self::Status),
            "/help" | "/start" => Some(Self::Help),
            _ => None,
        }
    }

    /// Permission string matching the config's `permissions` array entries.
    pub const fn permission(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Status => "status",
            Self::Help => "help",
        }
    }
}

/// One inbound command, as parsed off the wire.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Sender's platform user id.
    pub user_id: String,
    /// Sender's display username, if present.
    pub username: Option<String>,
    /// Chat to reply into.
    pub chat_id: String,
    /// Parsed command kind.
    pub command: CommandKind,
    /// When this update was received.
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let t = Utc::now();
        let a = ContentItem::fingerprint("feed", "https://example.com/a", t);
        let b = ContentItem::fingerprint("feed", "https://example.com/a", t);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_by_url() {
        let t = Utc::now();
        let a = ContentItem::fingerprint("feed", "https://example.com/a", t);
        let b = ContentItem::fingerprint("feed", "https://example.com/b", t);
        assert_ne!(a, b);
    }

    #[test]
    fn content_item_rejects_empty_url() {
        let item = ContentItem {
            id: "1".into(),
            title: "t".into(),
            content: "c".into(),
            url: String::new(),
            publish_time: Utc::now(),
            source_name: "s".into(),
            source_type: SourceType::Rss,
        };
        assert!(!item.is_valid(Utc::now()));
    }

    #[test]
    fn content_item_rejects_future_beyond_skew() {
        let now = Utc::now();
        let item = ContentItem {
            id: "1".into(),
            title: "t".into(),
            content: "c".into(),
            url: "https://example.com".into(),
            publish_time: now + Duration::hours(1),
            source_name: "s".into(),
            source_type: SourceType::Rss,
        };
        assert!(!item.is_valid(now));
    }

    #[test]
    fn command_kind_parses_bot_suffix() {
        assert_eq!(CommandKind::parse("/run@my_bot"), Some(CommandKind::Run));
        assert_eq!(CommandKind::parse("/status"), Some(CommandKind::Status));
        assert_eq!(CommandKind::parse("/nope"), None);
    }

    #[test]
    fn time_window_contains_is_inclusive() {
        let now = Utc::now();
        let window = TimeWindow::trailing_hours(now, 24);
        assert!(window.contains(now));
        assert!(window.contains(now - Duration::hours(24)));
        assert!(!window.contains(now - Duration::hours(25)));
    }
}
