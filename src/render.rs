//! Pure Markdown report rendering.

use crate::categories::CategoryRegistry;
use crate::model::AnalysisResult;
use crate::telegram::escape_markdown;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Render `results` into the §6 Markdown report format: one section per category in
/// registry order, each entry a numbered summary line followed by a metadata line.
/// Empty sections are omitted.
pub fn render_report(results: &[AnalysisResult], registry: &CategoryRegistry) -> String {
    let mut by_category: HashMap<&str, Vec<&AnalysisResult>> = HashMap::new();
    for result in results {
        by_category.entry(result.category.as_str()).or_default().push(result);
    }

    let mut out = String::new();
    for definition in registry.all_ordered() {
        let Some(entries) = by_category.get(definition.key.as_str()) else {
            continue;
        };
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(
            out,
            "{} *{}* ({}条)",
            definition.emoji,
            escape_markdown(&definition.display_name),
            entries.len()
        );
        out.push('\n');
        for (index, entry) in entries.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", index + 1, escape_markdown(&entry.summary));
            let _ = writeln!(
                out,
                "{} | {} | [查看原文]({})",
                entry.time, entry.weight_score, entry.source
            );
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
