//! Report delivery over Telegram.
//!
//! Chunking and in-order, stop-on-permanent-failure delivery grounded on the general
//! retry-with-backoff shape used by `market_snapshot.rs`/`structured_output.rs` for the
//! other HTTP call sites in this codebase.

use super::TelegramClient;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Telegram's per-message character budget; kept comfortably under the hard API limit.
pub const MAX_MESSAGE_CHARS: usize = 3500;
const MAX_DELIVERY_ATTEMPTS: usize = 3;

/// Result of one `deliver` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Whether all chunks were delivered.
    pub succeeded: bool,
    /// True if at least one chunk was delivered before any failure.
    pub partial_delivery: bool,
    /// How many chunks were actually sent.
    pub chunks_delivered: usize,
}

/// Sends a rendered report to a Telegram chat, split into size-bounded chunks.
pub struct TelegramDelivery {
    client: TelegramClient,
    parse_mode: String,
}

impl TelegramDelivery {
    /// Build a delivery service for `client`, sending with `parse_mode`.
    pub fn new(client: TelegramClient, parse_mode: String) -> Self {
        Self { client, parse_mode }
    }

    /// Split `report` into chunks and deliver them in order to `chat_id`.
    ///
    /// Stops at the first permanently-failing chunk; later chunks are never attempted.
    pub async fn deliver(&self, report: &str, chat_id: &str, cancel: &CancellationToken) -> DeliveryOutcome {
        if report.trim().is_empty() {
            return DeliveryOutcome {
                succeeded: true,
                partial_delivery: false,
                chunks_delivered: 0,
            };
        }

        let chunks = chunk_report(report, MAX_MESSAGE_CHARS);
        let mut delivered = 0;
        for chunk in &chunks {
            if cancel.is_cancelled() {
                break;
            }
            match self.send_with_retry(chunk, chat_id).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(%error, chunk_index = delivered, "telegram delivery failed permanently");
                    return DeliveryOutcome {
                        succeeded: false,
                        partial_delivery: delivered > 0,
                        chunks_delivered: delivered,
                    };
                }
            }
        }
        info!(chunks = delivered, "report delivered");
        DeliveryOutcome {
            succeeded: delivered == chunks.len(),
            partial_delivery: delivered > 0 && delivered < chunks.len(),
            chunks_delivered: delivered,
        }
    }

    async fn send_with_retry(&self, text: &str, chat_id: &str) -> anyhow::Result<()> {
        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(MAX_DELIVERY_ATTEMPTS - 1);
        Retry::spawn(strategy, || self.client.send_message(chat_id, text, &self.parse_mode)).await
    }
}

/// Split `report` into chunks no larger than `limit` characters, breaking only on
/// blank-line boundaries so Markdown blocks are never split mid-section.
fn chunk_report(report: &str, limit: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = report.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let candidate_len = if current.is_empty() {
            paragraph.len()
        } else {
            current.len() + 2 + paragraph.len()
        };
        if candidate_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        if paragraph.len() > limit {
            // A single paragraph that alone exceeds the limit is hard-split.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            for piece in paragraph.as_bytes().chunks(limit) {
                chunks.push(String::from_utf8_lossy(piece).into_owned());
            }
            continue;
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_report_respects_limit() {
        let paragraph = "x".repeat(100);
        let report = vec![paragraph.clone(); 5].join("\n\n");
        let chunks = chunk_report(&report, 250);
        assert!(chunks.iter().all(|c| c.len() <= 250 || c.len() == 100));
        assert_eq!(chunks.iter().map(|c| c.matches('x').count()).sum::<usize>(), 500);
    }

    #[test]
    fn chunk_report_single_paragraph_under_limit_is_one_chunk() {
        let report = "short report body";
        let chunks = chunk_report(report, 3500);
        assert_eq!(chunks, vec!["short report body".to_string()]);
    }

    #[test]
    fn chunk_report_splits_oversized_single_paragraph() {
        let report = "y".repeat(700);
        let chunks = chunk_report(&report, 250);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 700);
    }
}
