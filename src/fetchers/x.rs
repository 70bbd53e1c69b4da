//! X/Twitter fetcher, driven by an external CLI subprocess.
//!
//! No first-party X API client exists anywhere in the reference pack, so this mirrors
//! the teacher's general pattern of shelling out to an external tool and parsing its
//! stdout (as `git.rs` does for the `git` binary), here expecting newline-delimited
//! JSON objects shaped like `ContentItem`'s wire fields.

use super::ContentFetcher;
use crate::model::{ContentItem, SourceType, TimeWindow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct RawTweet {
    id: Option<String>,
    title: Option<String>,
    content: String,
    url: String,
    publish_time: chrono::DateTime<chrono::Utc>,
    author: Option<String>,
}

/// Shells out to an external CLI to search X/Twitter, parsing NDJSON from stdout.
pub struct XFetcher {
    name: String,
    cli_path: String,
    query: String,
    extra_args: Vec<String>,
    cookie_token: Option<String>,
}

impl XFetcher {
    /// Build a fetcher invoking `cli_path` with `query` and any `extra_args`.
    pub fn new(
        name: String,
        cli_path: String,
        query: String,
        extra_args: Vec<String>,
        cookie_token: Option<String>,
    ) -> Self {
        Self {
            name,
            cli_path,
            query,
            extra_args,
            cookie_token,
        }
    }
}

#[async_trait]
impl ContentFetcher for XFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        window: TimeWindow,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<Vec<ContentItem>> {
        let mut command = Command::new(&self.cli_path);
        command
            .arg("--query")
            .arg(&self.query)
            .arg("--since")
            .arg(window.start.to_rfc3339())
            .arg("--until")
            .arg(window.end.to_rfc3339())
            .args(&self.extra_args);
        if let Some(token) = &self.cookie_token {
            command.env("X_COOKIE_TOKEN", token);
        }

        let output = command.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "x fetcher subprocess exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut items = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let raw: RawTweet = match serde_json::from_str(line) {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::warn!(%error, line, "skipping malformed x fetcher line");
                    continue;
                }
            };
            if !window.contains(raw.publish_time) {
                continue;
            }
            let source_name = raw.author.unwrap_or_else(|| self.name.clone());
            let id = raw
                .id
                .unwrap_or_else(|| ContentItem::fingerprint(&source_name, &raw.url, raw.publish_time));
            items.push(ContentItem {
                id,
                title: raw.title.unwrap_or_default(),
                content: raw.content,
                url: raw.url,
                publish_time: raw.publish_time,
                source_name,
                source_type: SourceType::X,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tweet_deserializes_minimal_line() {
        let line = r#"{"content":"c","url":"https://x.com/a/status/1","publish_time":"2026-07-31T00:00:00Z"}"#;
        let raw: RawTweet = serde_json::from_str(line).unwrap();
        assert_eq!(raw.content, "c");
    }
}
