//! Prompt assembly: splices a market-snapshot body into the analysis prompt template.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Placeholder substituted with the market-snapshot body, exactly once.
pub const SNAPSHOT_PLACEHOLDER: &str = "${Grok_Summary_Here}";

struct CacheKey {
    template_mtime: DateTime<Utc>,
    snapshot_generated_at: DateTime<Utc>,
}

struct CacheEntry {
    key: CacheKey,
    prompt: String,
}

/// Assembles the final system prompt by substituting the market-snapshot placeholder,
/// caching the result by `(template_mtime, snapshot.generated_at)` so repeated calls
/// within one run do not re-splice identical input.
pub struct PromptAssembler {
    template: String,
    template_mtime: DateTime<Utc>,
    cache: Mutex<Option<CacheEntry>>,
}

impl PromptAssembler {
    /// Build an assembler over a fixed template and its last-modified time.
    pub fn new(template: String, template_mtime: DateTime<Utc>) -> Self {
        Self {
            template,
            template_mtime,
            cache: Mutex::new(None),
        }
    }

    /// Produce the assembled prompt for `snapshot_body`/`snapshot_generated_at`, reusing
    /// the cached result when the cache key matches.
    pub fn assemble(&self, snapshot_body: &str, snapshot_generated_at: DateTime<Utc>) -> String {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.as_ref()
            && entry.key.template_mtime == self.template_mtime
            && entry.key.snapshot_generated_at == snapshot_generated_at
        {
            return entry.prompt.clone();
        }

        let prompt = self.template.replacen(SNAPSHOT_PLACEHOLDER, snapshot_body, 1);
        *cache = Some(CacheEntry {
            key: CacheKey {
                template_mtime: self.template_mtime,
                snapshot_generated_at,
            },
            prompt: prompt.clone(),
        });
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholder_exactly_once() {
        let template = format!("Header\n{SNAPSHOT_PLACEHOLDER}\nFooter {SNAPSHOT_PLACEHOLDER}");
        let assembler = PromptAssembler::new(template, Utc::now());
        let result = assembler.assemble("BODY WITH https://example.com LINK", Utc::now());
        assert_eq!(
            result,
            "Header\nBODY WITH https://example.com LINK\nFooter ${Grok_Summary_Here}"
        );
    }

    #[test]
    fn preserves_urls_in_snapshot_body_verbatim() {
        let template = SNAPSHOT_PLACEHOLDER.to_string();
        let assembler = PromptAssembler::new(template, Utc::now());
        let body = "See https://example.com/a?x=1&y=2 for detail.";
        assert_eq!(assembler.assemble(body, Utc::now()), body);
    }

    #[test]
    fn caches_by_template_and_snapshot_time() {
        let template = SNAPSHOT_PLACEHOLDER.to_string();
        let assembler = PromptAssembler::new(template, Utc::now());
        let t = Utc::now();
        let first = assembler.assemble("A", t);
        let second = assembler.assemble("different body but same key", t);
        assert_eq!(first, second);
    }
}
