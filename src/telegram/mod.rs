//! Telegram Bot API access.
//!
//! No bot-framework dependency (e.g. `teloxide`) appears anywhere in the reference
//! pack, so this talks to the Bot API directly via `reqwest`, matching the teacher's
//! general preference for a thin raw-HTTP provider layer (`llm_providers::gemini`)
//! over a heavyweight SDK.

pub mod delivery;
pub mod listener;

use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimal raw client for the two Bot API calls this pipeline needs.
pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
}

impl TelegramClient {
    /// Build a client for the bot identified by `bot_token`.
    pub fn new(bot_token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TELEGRAM_HTTP_TIMEOUT)
            .build()?;
        Ok(Self { client, bot_token })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Send one Markdown-formatted message to `chat_id`.
    pub async fn send_message(&self, chat_id: &str, text: &str, parse_mode: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": parse_mode,
        });
        let response = self.client.post(self.api_url("sendMessage")).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage failed {status}: {text}");
        }
        Ok(())
    }

    /// Long-poll for updates since `offset`, waiting up to `timeout_secs`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> anyhow::Result<Vec<Update>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("getUpdates failed {status}");
        }
        let parsed: GetUpdatesResponse = response.json().await?;
        Ok(parsed.result)
    }
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    result: Vec<Update>,
}

/// One inbound Telegram update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

/// One inbound Telegram message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub text: Option<String>,
    pub chat: Chat,
    pub from: Option<User>,
    pub date: i64,
}

/// A Telegram chat reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// A Telegram user reference.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

/// Escape characters reserved by Telegram's legacy Markdown parse mode.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '[' | ']' | '`') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_markdown_escapes_reserved_characters() {
        assert_eq!(escape_markdown("a_b*c[d]e`f"), "a\\_b\\*c\\[d\\]e\\`f");
    }
}
