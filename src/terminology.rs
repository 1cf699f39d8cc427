use std::collections::{BTreeMap, HashMap};

use crate::table::Table;
use crate::tokenize::{tokenize, Tokenizer};

/// Key of the language-agnostic list used when a language has no list of its own.
pub const FALLBACK_LANGUAGE: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermEntry {
    pub source: String,
    pub target: String,
}

/// Per-column outcome of a terminology load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermLoadReport {
    pub loaded: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
    pub missing_columns: Vec<String>,
}

impl TermLoadReport {
    /// False when nothing at all could be loaded because a required column was absent.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.missing_columns.is_empty() || self.loaded.values().any(|n| *n > 0)
    }

    #[must_use]
    pub fn total_loaded(&self) -> usize {
        self.loaded.values().sum()
    }

    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Matched source phrase -> distinct candidate translations, in index order.
pub type TermMatches = BTreeMap<String, Vec<String>>;

/// Source -> target phrase lists, one independent list per target language.
///
/// Duplicate sources are kept: each is a separate acceptable translation.
#[derive(Clone, Debug, Default)]
pub struct TerminologyIndex {
    by_language: HashMap<String, Vec<TermEntry>>,
}

impl TerminologyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the lists of every language in `target_columns` (language -> column name).
    pub fn load(
        &mut self,
        table: &Table,
        source_column: &str,
        target_columns: &BTreeMap<String, String>,
    ) -> TermLoadReport {
        let mut report = TermLoadReport::default();
        let Some(src_col) = table.column_index(source_column) else {
            tracing::warn!(
                column = source_column,
                rows = table.len(),
                "terminology source column missing; nothing loaded"
            );
            report.missing_columns.push(source_column.to_string());
            for lang in target_columns.keys() {
                report.skipped.insert(lang.clone(), table.len());
            }
            return report;
        };

        for (lang, column) in target_columns {
            let Some(tgt_col) = table.column_index(column) else {
                tracing::warn!(
                    language = lang.as_str(),
                    column = column.as_str(),
                    rows = table.len(),
                    "terminology target column missing; language skipped"
                );
                report.missing_columns.push(column.clone());
                report.skipped.insert(lang.clone(), table.len());
                continue;
            };
            let (entries, skipped) = collect_pairs(table, src_col, tgt_col);
            tracing::info!(
                language = lang.as_str(),
                loaded = entries.len(),
                skipped,
                "terminology loaded"
            );
            report.loaded.insert(lang.clone(), entries.len());
            report.skipped.insert(lang.clone(), skipped);
            self.by_language.insert(lang.clone(), entries);
        }
        report
    }

    /// Loads a single source/target column pair as the list shared by languages without one.
    pub fn load_single(
        &mut self,
        table: &Table,
        source_column: &str,
        target_column: &str,
    ) -> TermLoadReport {
        let mut cols = BTreeMap::new();
        cols.insert(FALLBACK_LANGUAGE.to_string(), target_column.to_string());
        self.load(table, source_column, &cols)
    }

    pub fn insert(&mut self, language: &str, source: &str, target: &str) {
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return;
        }
        self.by_language
            .entry(language.to_string())
            .or_default()
            .push(TermEntry {
                source: source.to_string(),
                target: target.to_string(),
            });
    }

    pub fn reset(&mut self) {
        self.by_language.clear();
    }

    #[must_use]
    pub fn len(&self, language: &str) -> usize {
        self.entries(language).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_language.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn languages(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.by_language.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    /// The list used for `language`: its own when non-empty, else the shared fallback list.
    #[must_use]
    pub fn entries(&self, language: &str) -> &[TermEntry] {
        match self.by_language.get(language) {
            Some(v) if !v.is_empty() => v,
            _ => self
                .by_language
                .get(FALLBACK_LANGUAGE)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }

    /// Entries whose source equals a token of `text` or occurs anywhere in `text`.
    #[must_use]
    pub fn find_matches(&self, tokenizer: &dyn Tokenizer, text: &str, language: &str) -> TermMatches {
        let entries = self.entries(language);
        let mut out = TermMatches::new();
        if entries.is_empty() || text.trim().is_empty() {
            return out;
        }

        for token in tokenize(tokenizer, text) {
            for e in entries.iter().filter(|e| e.source == token) {
                push_candidate(&mut out, &e.source, &e.target);
            }
        }
        for e in entries.iter().filter(|e| text.contains(e.source.as_str())) {
            push_candidate(&mut out, &e.source, &e.target);
        }
        out
    }

    /// Renders the terminology reference block, or an empty string when nothing matched.
    #[must_use]
    pub fn render_for_prompt(matches: &TermMatches) -> String {
        if matches.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for (src, targets) in matches {
            out.push_str("- ");
            out.push_str(src);
            out.push_str(" => ");
            out.push_str(&targets.join(" / "));
            if targets.len() > 1 {
                out.push_str(" (choose by context)");
            }
            out.push('\n');
        }
        out
    }
}

fn collect_pairs(table: &Table, src_col: usize, tgt_col: usize) -> (Vec<TermEntry>, usize) {
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for row in 0..table.len() {
        match (table.cell(row, src_col), table.cell(row, tgt_col)) {
            (Some(source), Some(target)) => entries.push(TermEntry {
                source: source.to_string(),
                target: target.to_string(),
            }),
            _ => skipped += 1,
        }
    }
    (entries, skipped)
}

fn push_candidate(out: &mut TermMatches, source: &str, target: &str) {
    let slot = out.entry(source.to_string()).or_default();
    if !slot.iter().any(|t| t == target) {
        slot.push(target.to_string());
    }
}
