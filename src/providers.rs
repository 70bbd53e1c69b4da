//! LLM provider identifiers.
//!
//! Single source of truth for the providers an `llm.provider` / `market_snapshot.provider`
//! config value may name, and the defaults (context window, API key env var) that follow
//! from picking one. Grounded on the teacher's `providers.rs`, trimmed to what this
//! pipeline's two LLM call sites (structured analysis, market snapshot) actually need —
//! there is no "fast model" distinction here, since both call sites use one configured
//! model each.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Anthropic,
    Google,
    /// X.AI's Grok, the natural fit for the web-browsing market-snapshot call.
    XAI,
}

impl Provider {
    /// All available providers.
    pub const ALL: &'static [Provider] =
        &[Provider::OpenAI, Provider::Anthropic, Provider::Google, Provider::XAI];

    /// Provider name as used in config files and CLI.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::XAI => "xai",
        }
    }

    /// Default chat-completions endpoint for this provider.
    pub const fn default_endpoint(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::Google => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
            Self::XAI => "https://api.x.ai/v1/chat/completions",
        }
    }

    /// Default model for this provider.
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-5.1",
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::Google => "gemini-3-pro-preview",
            Self::XAI => "grok-4",
        }
    }

    /// Context window size (max tokens), used for `ContextOverflow` budgeting.
    pub const fn context_window(&self) -> usize {
        match self {
            Self::OpenAI => 128_000,
            Self::Anthropic => 200_000,
            Self::Google => 1_000_000,
            Self::XAI => 131_072,
        }
    }

    /// Environment variable name for the API key.
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::XAI => "XAI_API_KEY",
        }
    }

    /// Whether this provider natively supports a JSON-schema-bound response format.
    ///
    /// Providers without native support still get a schema-shaped response: the
    /// `StructuredOutputClient` appends a JSON-only instruction to the prompt instead.
    pub const fn supports_native_json_schema(&self) -> bool {
        matches!(self, Self::OpenAI | Self::Google)
    }

    /// All provider names as strings.
    pub fn all_names() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::name).collect()
    }
}

impl FromStr for Provider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.name() == lower)
            .copied()
            .ok_or_else(|| ProviderError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Provider configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}. Supported: openai, anthropic, google, xai")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_str_roundtrips() {
        assert_eq!("openai".parse::<Provider>().ok(), Some(Provider::OpenAI));
        assert_eq!("XAI".parse::<Provider>().ok(), Some(Provider::XAI));
        assert!("invalid".parse::<Provider>().is_err());
    }

    #[test]
    fn provider_defaults() {
        assert_eq!(Provider::OpenAI.default_model(), "gpt-5.1");
        assert_eq!(Provider::Anthropic.context_window(), 200_000);
        assert_eq!(Provider::Google.api_key_env(), "GOOGLE_API_KEY");
        assert!(Provider::OpenAI.supports_native_json_schema());
        assert!(!Provider::Anthropic.supports_native_json_schema());
    }
}
