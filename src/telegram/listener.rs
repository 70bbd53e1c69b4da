//! Telegram on-demand command listener.
//!
//! State machine per §4.7: `received → authorized? → rate-limit? → dispatched →
//! (accepted|rejected:busy)`. Grounded on the command-dispatch-to-text-reply shape in
//! the pack's Telegram control-surface reference example, adapted to this pipeline's
//! `ExecutionController`/permission/rate-limit model.

use super::TelegramClient;
use crate::config::TelegramCommandsConfig;
use crate::controller::{ExecutionController, RunFactory};
use crate::errors::{CommandOutcome, RejectReason};
use crate::model::{CommandInvocation, CommandKind, TriggerReason};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_TIMEOUT_SECS: u64 = 30;

struct UserBucket {
    accepted_run_times: Vec<Instant>,
    last_accepted_run: Option<Instant>,
}

impl UserBucket {
    fn new() -> Self {
        Self {
            accepted_run_times: Vec::new(),
            last_accepted_run: None,
        }
    }
}

/// Per-user token-bucket + cooldown rate limiter for `/run`, process-memory only
/// (§9 open question: restart clears all buckets).
struct RateLimiter {
    buckets: Mutex<HashMap<String, UserBucket>>,
    config: crate::config::CommandRateLimit,
}

impl RateLimiter {
    fn new(config: crate::config::CommandRateLimit) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Check whether `user_id` may issue another `/run` now; if so, record it.
    fn try_accept(&self, user_id: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(user_id.to_string()).or_insert_with(UserBucket::new);

        if let Some(last) = bucket.last_accepted_run {
            let cooldown = Duration::from_secs(u64::from(self.config.cooldown_minutes) * 60);
            let elapsed = now.duration_since(last);
            if elapsed < cooldown {
                return Err((cooldown - elapsed).as_secs());
            }
        }

        let window = Duration::from_secs(3600);
        bucket.accepted_run_times.retain(|t| now.duration_since(*t) < window);
        if bucket.accepted_run_times.len() >= self.config.max_commands_per_hour as usize {
            let oldest = bucket.accepted_run_times[0];
            let retry_after = window.saturating_sub(now.duration_since(oldest)).as_secs();
            return Err(retry_after.max(1));
        }

        bucket.accepted_run_times.push(now);
        bucket.last_accepted_run = Some(now);
        Ok(())
    }
}

/// Long-polls Telegram for updates, authorizes and rate-limits senders, and dispatches
/// recognized commands to the shared `ExecutionController`.
pub struct TelegramCommandListener {
    client: TelegramClient,
    config: TelegramCommandsConfig,
    controller: Arc<ExecutionController>,
    run_factory: RunFactory,
    rate_limiter: RateLimiter,
}

impl TelegramCommandListener {
    /// Build a listener over `client`, dispatching accepted `/run` commands through
    /// `controller` using `run_factory` to build the actual pipeline-run future.
    pub fn new(
        client: TelegramClient,
        config: TelegramCommandsConfig,
        controller: Arc<ExecutionController>,
        run_factory: RunFactory,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.command_rate_limit);
        Self {
            client,
            config,
            controller,
            run_factory,
            rate_limiter,
        }
    }

    /// Poll for updates until `cancel` fires, dispatching each recognized command.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            return;
        }
        let mut offset: i64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let updates = tokio::select! {
                result = self.client.get_updates(offset, POLL_TIMEOUT_SECS) => result,
                _ = cancel.cancelled() => break,
            };
            let updates = match updates {
                Ok(updates) => updates,
                Err(error) => {
                    warn!(%error, "telegram getUpdates failed");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else { continue };
                let Some(text) = message.text else { continue };
                let Some(command) = CommandKind::parse(&text) else { continue };
                let user_id = message.from.as_ref().map(|u| u.id.to_string()).unwrap_or_default();
                let username = message.from.and_then(|u| u.username);
                let invocation = CommandInvocation {
                    user_id,
                    username,
                    chat_id: message.chat.id.to_string(),
                    command,
                    received_at: Utc::now(),
                };
                let outcome = self.dispatch(&invocation).await;
                let reply = match outcome {
                    CommandOutcome::Accepted(text) => text,
                    CommandOutcome::Rejected(reason) => reason.message(),
                };
                if let Err(error) = self.client.send_message(&invocation.chat_id, &reply, "Markdown").await {
                    warn!(%error, "failed to reply to telegram command");
                }
            }
        }
    }

    /// Authorize, rate-limit, and dispatch one parsed invocation.
    async fn dispatch(&self, invocation: &CommandInvocation) -> CommandOutcome {
        let Some(user) = self.config.find_user(&invocation.user_id) else {
            warn!(user_id = %invocation.user_id, "unauthorized telegram command");
            return CommandOutcome::Rejected(RejectReason::Unauthorized);
        };
        if !user.allows(invocation.command.permission()) {
            return CommandOutcome::Rejected(RejectReason::Unauthorized);
        }

        match invocation.command {
            CommandKind::Help => CommandOutcome::Accepted(help_message(user)),
            CommandKind::Status => {
                let status = self.controller.status();
                CommandOutcome::Accepted(format_status(&status))
            }
            CommandKind::Run => {
                if let Err(retry_after_secs) = self.rate_limiter.try_accept(&invocation.user_id) {
                    return CommandOutcome::Rejected(RejectReason::RateLimited { retry_after_secs });
                }
                let factory = self.run_factory.clone();
                let outcome = self
                    .controller
                    .trigger(TriggerReason::Command, move |token| factory(token))
                    .await;
                match outcome {
                    crate::errors::TriggerOutcome::Accepted => {
                        info!(user_id = %invocation.user_id, "run command accepted");
                        CommandOutcome::Accepted("accepted".to_string())
                    }
                    crate::errors::TriggerOutcome::RejectedBusy => CommandOutcome::Rejected(RejectReason::Busy),
                }
            }
        }
    }
}

fn help_message(user: &crate::config::AuthorizedUser) -> String {
    let mut lines = vec!["Available commands:".to_string()];
    if user.allows("run") {
        lines.push("/run - trigger an analysis pass".to_string());
    }
    if user.allows("status") {
        lines.push("/status - report the current run state".to_string());
    }
    lines.push("/help - show this message".to_string());
    lines.join("\n")
}

fn format_status(status: &crate::controller::StatusSnapshot) -> String {
    match &status.latest_run {
        None => "no run has executed yet".to_string(),
        Some(run) => {
            let busy = if status.busy { "busy" } else { "idle" };
            format!("{busy} | last run #{} state={:?}", run.run_id, run.state)
        }
    }
}
