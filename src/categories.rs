//! Dynamic category registry.
//!
//! Categories are discovered from the analysis prompt at startup and from the model's
//! responses at runtime; they are never a closed Rust enum (§9 "Dynamic typing → tagged
//! variants only where the domain is actually closed"). Grounded on the teacher's
//! `instruction_presets` library-loading pattern, adapted to parse category bullets
//! instead of preset blocks.

use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Default emoji palette used to synthesize a definition for an unseen category key.
const DEFAULT_EMOJI_PALETTE: &[&str] = &["📌", "🔔", "📎", "🧩", "🗂️", "🔹", "🔸", "🏷️"];

static BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- \*\*(?P<key>[^:*]+):\*\*\s*(?P<desc>.*)$").expect("valid regex"));

/// A single category's display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDefinition {
    /// Stable identifier, as it appears in `AnalysisResult.category`.
    pub key: String,
    /// Localized display name.
    pub display_name: String,
    /// Single glyph shown in section headers.
    pub emoji: String,
    /// Free-form description, from the prompt bullet.
    pub description: String,
    /// Position in parse (or first-seen) order.
    pub order_index: usize,
}

struct Inner {
    definitions: HashMap<String, CategoryDefinition>,
    order: Vec<String>,
}

/// Runtime-mutable mapping from category key to display metadata.
pub struct CategoryRegistry {
    inner: Mutex<Inner>,
}

impl CategoryRegistry {
    /// Parse top-level bullet lines `- **<Key>:** <description>` out of an analysis
    /// prompt's text, establishing parse order.
    pub fn load_from_prompt(prompt_text: &str) -> Self {
        let mut definitions = HashMap::new();
        let mut order = Vec::new();

        for line in prompt_text.lines() {
            let Some(caps) = BULLET_PATTERN.captures(line.trim()) else {
                continue;
            };
            let key = caps["key"].trim().to_string();
            if definitions.contains_key(&key) {
                continue;
            }
            let description = caps["desc"].trim().to_string();
            let order_index = order.len();
            definitions.insert(
                key.clone(),
                CategoryDefinition {
                    key: key.clone(),
                    display_name: key.clone(),
                    emoji: synthesize_emoji(&key),
                    description,
                    order_index,
                },
            );
            order.push(key);
        }

        Self {
            inner: Mutex::new(Inner { definitions, order }),
        }
    }

    /// An empty registry, useful for tests that only exercise synthesis.
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Inner {
                definitions: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Look up (or synthesize, recording) the definition for `key`.
    pub fn lookup(&self, key: &str) -> CategoryDefinition {
        let mut inner = self.inner.lock();
        if let Some(def) = inner.definitions.get(key) {
            return def.clone();
        }
        let order_index = inner.order.len();
        let def = CategoryDefinition {
            key: key.to_string(),
            display_name: key.to_string(),
            emoji: synthesize_emoji(key),
            description: String::new(),
            order_index,
        };
        inner.definitions.insert(key.to_string(), def.clone());
        inner.order.push(key.to_string());
        def
    }

    /// Register a runtime-discovered key without requiring the caller to use the
    /// returned definition.
    pub fn record_seen(&self, key: &str) {
        let _ = self.lookup(key);
    }

    /// All definitions in parse order, with synthesized ones appended in first-seen order.
    pub fn all_ordered(&self) -> Vec<CategoryDefinition> {
        let inner = self.inner.lock();
        let mut defs: Vec<_> = inner
            .order
            .iter()
            .filter_map(|key| inner.definitions.get(key).cloned())
            .collect();
        defs.sort_by_key(|d| d.order_index);
        defs
    }
}

/// Deterministic-by-key emoji synthesis for an unknown category.
fn synthesize_emoji(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let index = usize::from(digest[0]) % DEFAULT_EMOJI_PALETTE.len();
    DEFAULT_EMOJI_PALETTE[index].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "\
You are a crypto news analyst.

- **Truth:** on-chain facts and verifiable events
- **Speculation:** rumors and unconfirmed reports
- **Macro:** broader economic context

Respond only with JSON.
";

    #[test]
    fn parses_bullets_in_order() {
        let registry = CategoryRegistry::load_from_prompt(PROMPT);
        let all = registry.all_ordered();
        let keys: Vec<_> = all.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["Truth", "Speculation", "Macro"]);
    }

    #[test]
    fn lookup_synthesizes_for_unknown_key() {
        let registry = CategoryRegistry::load_from_prompt(PROMPT);
        let def = registry.lookup("NewVertical");
        assert_eq!(def.key, "NewVertical");
        assert!(!def.emoji.is_empty());
    }

    #[test]
    fn synthesis_is_deterministic_by_key() {
        let registry = CategoryRegistry::load_from_prompt(PROMPT);
        let a = registry.lookup("SameKey");
        let registry2 = CategoryRegistry::load_from_prompt(PROMPT);
        let b = registry2.lookup("SameKey");
        assert_eq!(a.emoji, b.emoji);
    }

    #[test]
    fn synthesized_definitions_appended_after_prompt_defined() {
        let registry = CategoryRegistry::load_from_prompt(PROMPT);
        registry.record_seen("NewVertical");
        let all = registry.all_ordered();
        assert_eq!(all.last().unwrap().key, "NewVertical");
        assert_eq!(all.len(), 4);
    }
}
