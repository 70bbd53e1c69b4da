//! Structured-output LLM client: sends a schema-bound chat request, validates the
//! response, and retries with a progressively stricter repair instruction.
//!
//! Grounded on the teacher's `agents/output_validator.rs` recovery passes (missing
//! fields, type mismatches, null-to-default) and `llm_providers::gemini` raw-`reqwest`
//! call shape; retry policy borrowed from `tokio-retry`, already a teacher dependency.

use crate::config::LlmConfig;
use crate::errors::{AnalysisFailed, AnalysisFailedKind};
use crate::providers::Provider;
use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tiktoken_rs::cl100k_base;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{instrument, warn};

const LLM_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_HTTP_ATTEMPTS: usize = 3;

static THINK_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*<think>.*?</think>\s*").expect("valid regex"));

/// One classified/scored entry returned by the analyzer LLM call.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AnalysisResultRaw {
    pub time: String,
    pub category: String,
    pub weight_score: i64,
    pub summary: String,
    pub source: String,
}

/// The schema-bound response body: `{ "results": [...] }`, mirrored as a `JsonSchema`
/// so a native-schema-capable provider (see `Provider::supports_native_json_schema`)
/// can be handed the schema directly.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default, PartialEq, Eq)]
pub struct BatchAnalysisResult {
    pub results: Vec<AnalysisResultRaw>,
}

/// Backend capable of issuing one (non-retried) chat completion call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Issue one chat request; returns the raw assistant message content.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}

/// `reqwest`-backed chat backend targeting an OpenAI-compatible chat-completions endpoint.
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl HttpChatBackend {
    /// Build a backend from config, resolving the API key from its `*_env` variable.
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let api_key = crate::config::SentinelConfig::resolve_api_key(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(LLM_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        if self.config.provider.supports_native_json_schema() {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(self.config.effective_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            anyhow::bail!("rate limited: HTTP 429");
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("server error {status}: {text}");
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("request failed {status}: {text}"));
        }

        let parsed: Value = response.json().await?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("response missing message content"))
    }
}

/// Calls a chat LLM with a JSON-schema-bound request, validating and repairing the
/// response before handing back a `BatchAnalysisResult`.
pub struct StructuredOutputClient {
    backend: Box<dyn ChatBackend>,
    provider: Provider,
    context_window: usize,
    max_tokens: u64,
}

impl StructuredOutputClient {
    /// Build a client from a backend and the provider/config it targets.
    pub fn new(backend: Box<dyn ChatBackend>, provider: Provider, max_tokens: u64) -> Self {
        Self {
            backend,
            provider,
            context_window: provider.context_window(),
            max_tokens,
        }
    }

    /// Estimate the prompt's token count and reject up front if it would overflow
    /// the model's context window once `max_tokens` of headroom are reserved.
    fn check_context_budget(&self, system_prompt: &str, user_prompt: &str) -> Result<(), AnalysisFailed> {
        let bpe = cl100k_base().expect("cl100k_base encoder always available");
        let estimate = bpe.encode_ordinary(system_prompt).len() + bpe.encode_ordinary(user_prompt).len();
        let budget = usize::try_from(self.max_tokens).unwrap_or(usize::MAX);
        if estimate + budget > self.context_window {
            return Err(AnalysisFailed {
                kind: AnalysisFailedKind::ContextOverflow,
                detail: format!(
                    "estimated {estimate} prompt tokens + {budget} max_tokens exceeds context window {}",
                    self.context_window
                ),
            });
        }
        Ok(())
    }

    /// Send the analysis request, validating and, on one occasion, repairing the
    /// response against the expected schema.
    #[instrument(skip(self, system_prompt, user_prompt))]
    pub async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<BatchAnalysisResult, AnalysisFailed> {
        self.check_context_budget(system_prompt, user_prompt)?;

        let effective_user_prompt = if self.provider.supports_native_json_schema() {
            user_prompt.to_string()
        } else {
            format!(
                "{user_prompt}\n\nRespond with ONLY a single JSON object matching this shape: {{\"results\": [{{\"time\": string, \"category\": string, \"weight_score\": integer 0-100, \"summary\": string, \"source\": string}}]}}. No prose, no markdown fences."
            )
        };

        let strategy = ExponentialBackoff::from_millis(200)
            .map(jitter)
            .take(MAX_HTTP_ATTEMPTS - 1);

        let raw = Retry::spawn(strategy, || {
            self.backend.complete(system_prompt, &effective_user_prompt)
        })
        .await
        .map_err(|error| classify_http_failure(&error))?;

        match parse_and_validate(&raw) {
            Ok(result) => Ok(result),
            Err(validator_error) => {
                warn!(%validator_error, "schema validation failed, attempting repair");
                let repair_prompt = format!(
                    "{effective_user_prompt}\n\nYour previous response was invalid: {validator_error}. Return ONLY the corrected JSON object, matching the schema exactly."
                );
                let repaired = self
                    .backend
                    .complete(system_prompt, &repair_prompt)
                    .await
                    .map_err(|error| classify_http_failure(&error))?;
                parse_and_validate(&repaired).map_err(|detail| AnalysisFailed {
                    kind: AnalysisFailedKind::SchemaInvalid,
                    detail,
                })
            }
        }
    }
}

fn classify_http_failure(error: &anyhow::Error) -> AnalysisFailed {
    let message = error.to_string();
    let kind = if message.contains("429") || message.contains("rate limited") {
        AnalysisFailedKind::RateLimited
    } else {
        AnalysisFailedKind::Network
    };
    AnalysisFailed {
        kind,
        detail: message,
    }
}

/// Strip an optional `<think>...</think>` prefix, extract the first balanced JSON
/// object, and validate it against `BatchAnalysisResult`'s shape.
fn parse_and_validate(raw: &str) -> Result<BatchAnalysisResult, String> {
    let stripped = THINK_PREFIX.replace(raw, "");
    let object_text = extract_first_json_object(&stripped)
        .ok_or_else(|| "no JSON object found in response".to_string())?;
    serde_json::from_str::<BatchAnalysisResult>(&object_text).map_err(|e| e.to_string())
}

/// Extract the first balanced `{...}` substring, tolerating surrounding prose.
fn extract_first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticBackend {
        response: String,
    }

    #[async_trait]
    impl ChatBackend for StaticBackend {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    struct CountingFailingBackend {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatBackend for CountingFailingBackend {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("HTTP 429 rate limited")
        }
    }

    #[test]
    fn extracts_json_with_surrounding_prose() {
        let text = "here you go: {\"results\": []} thanks";
        let extracted = extract_first_json_object(text).unwrap();
        assert_eq!(extracted, "{\"results\": []}");
    }

    #[test]
    fn strips_think_prefix_before_extraction() {
        let text = "<think>reasoning here</think>\n{\"results\": []}";
        let result = parse_and_validate(text).unwrap();
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn analyze_succeeds_on_valid_first_response() {
        let client = StructuredOutputClient::new(
            Box::new(StaticBackend {
                response: "{\"results\": [{\"time\": \"2026-07-31 00:00\", \"category\": \"Truth\", \"weight_score\": 80, \"summary\": \"s\", \"source\": \"https://example.com\"}]}".to_string(),
            }),
            Provider::OpenAI,
            4096,
        );
        let result = client.analyze("system", "user").await.unwrap();
        assert_eq!(result.results.len(), 1);
    }

    #[tokio::test]
    async fn analyze_repairs_once_then_succeeds() {
        struct RepairBackend {
            calls: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl ChatBackend for RepairBackend {
            async fn complete(&self, _s: &str, _u: &str) -> anyhow::Result<String> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Ok("not json at all".to_string())
                } else {
                    Ok("{\"results\": []}".to_string())
                }
            }
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let client = StructuredOutputClient::new(
            Box::new(RepairBackend {
                calls: calls.clone(),
            }),
            Provider::OpenAI,
            4096,
        );
        let result = client.analyze("system", "user").await.unwrap();
        assert!(result.results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn analyze_returns_rate_limited_after_exhausting_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = StructuredOutputClient::new(
            Box::new(CountingFailingBackend {
                calls: calls.clone(),
            }),
            Provider::OpenAI,
            4096,
        );
        let error = client.analyze("system", "user").await.unwrap_err();
        assert_eq!(error.kind, AnalysisFailedKind::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_HTTP_ATTEMPTS);
    }

    #[test]
    fn context_budget_rejects_oversized_prompt() {
        let client = StructuredOutputClient::new(
            Box::new(StaticBackend {
                response: String::new(),
            }),
            Provider::OpenAI,
            4096,
        );
        let huge = "word ".repeat(200_000);
        let error = client.check_context_budget(&huge, "").unwrap_err();
        assert_eq!(error.kind, AnalysisFailedKind::ContextOverflow);
    }
}
