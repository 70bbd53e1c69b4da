//! Central typed error and outcome types.
//!
//! `anyhow` is used for application glue (CLI, wiring); the typed outcomes below are
//! matched on by callers that need to branch on the specific reason a step did not
//! succeed, mirroring the teacher's split between `anyhow::Error` for plumbing and
//! `thiserror`-derived enums for anything a caller needs to inspect.

use thiserror::Error;

/// Top-level error surfaced at process boundaries (CLI exit codes, `/status`).
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Configuration failed validation; fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A network call failed but may succeed on retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The remote service is rate-limiting us.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A structured-output response did not conform to the expected schema.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// The prompt would exceed the model's context window.
    #[error("context overflow: prompt would exceed model context window")]
    ContextOverflow,

    /// The caller is not authorized to perform this action.
    #[error("unauthorized")]
    Unauthorized,

    /// Message delivery failed, possibly after delivering some chunks.
    #[error("delivery failed (partial_delivery={partial_delivery})")]
    DeliveryFailed {
        /// Whether at least one chunk was delivered before the failure.
        partial_delivery: bool,
    },

    /// The run was cancelled by an explicit request.
    #[error("cancelled")]
    CancelledByUser,

    /// The run exceeded its configured watchdog timeout.
    #[error("timed out")]
    TimedOut,
}

/// Reason a `StructuredOutputClient::analyze` call failed irrecoverably for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnalysisFailedKind {
    /// Persistent rate limiting across all retry attempts.
    #[error("rate_limited")]
    RateLimited,
    /// Persistent transient network failure across all retry attempts.
    #[error("network")]
    Network,
    /// The response never validated against the schema, even after a repair attempt.
    #[error("schema_invalid")]
    SchemaInvalid,
    /// The prompt could not be made to fit the model's context window.
    #[error("context_overflow")]
    ContextOverflow,
}

/// Typed failure for one batch dispatch; never aborts the overall analyzer run.
#[derive(Debug, Clone, Error)]
#[error("analysis failed: {kind}")]
pub struct AnalysisFailed {
    /// Coarse failure category.
    pub kind: AnalysisFailedKind,
    /// Human-readable detail for logs.
    pub detail: String,
}

/// Outcome of an `ExecutionController::trigger` call; `Busy` is a normal control
/// outcome, not an error condition, so it is modeled as a variant rather than raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The trigger was accepted and a run was started.
    Accepted,
    /// A run was already pending or running; this trigger was rejected, not queued.
    RejectedBusy,
}

/// Outcome of dispatching one Telegram command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was dispatched successfully; text is the reply to send.
    Accepted(String),
    /// The command was rejected; text is the reply to send.
    Rejected(RejectReason),
}

/// Why a Telegram command was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The sender has no mapped permissions.
    Unauthorized,
    /// A run is already pending or running.
    Busy,
    /// The sender exceeded `max_commands_per_hour` or the per-command cooldown.
    RateLimited {
        /// Remaining cooldown before another `/run` will be accepted.
        retry_after_secs: u64,
    },
    /// The command text did not match any known command.
    UnknownCommand,
}

impl RejectReason {
    /// Short, user-facing message matching the wording mandated in §7.
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized => "unauthorized".to_string(),
            Self::Busy => "busy".to_string(),
            Self::RateLimited { retry_after_secs } => {
                format!("cooldown {retry_after_secs}s")
            }
            Self::UnknownCommand => "unknown command".to_string(),
        }
    }
}
