use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTEXT_SIZE: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(rename = "原文")]
    pub source: String,
    #[serde(rename = "译文")]
    pub translation: String,
    #[serde(rename = "角色", default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Accepted translations for one language, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageHistory {
    entries: VecDeque<ContextEntry>,
}

impl LanguageHistory {
    /// Appends and evicts from the front until at most `max_entries` remain.
    pub fn push(&mut self, entry: ContextEntry, max_entries: usize) {
        self.entries.push_back(entry);
        while self.entries.len() > max_entries {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Context reference body; empty when there is no history.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, e) in self.entries.iter().enumerate() {
            out.push_str(&format!("{}. ", i + 1));
            if let Some(speaker) = e.speaker.as_deref() {
                out.push('[');
                out.push_str(speaker);
                out.push_str("] ");
            }
            out.push_str("Source: ");
            out.push_str(&e.source);
            out.push_str("\n   Translation: ");
            out.push_str(&e.translation);
            out.push('\n');
        }
        out
    }
}

/// Mutable view of one language's history together with the ledger bound.
pub struct ContextWindow<'a> {
    history: &'a mut LanguageHistory,
    max_entries: usize,
}

impl<'a> ContextWindow<'a> {
    pub fn new(history: &'a mut LanguageHistory, max_entries: usize) -> Self {
        Self {
            history,
            max_entries,
        }
    }

    pub fn render(&self) -> String {
        self.history.render()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn append(&mut self, source: &str, translation: &str, speaker: Option<&str>) {
        self.history.push(
            ContextEntry {
                source: source.to_string(),
                translation: translation.to_string(),
                speaker: speaker.map(str::to_string),
            },
            self.max_entries,
        );
    }
}

/// Bounded rolling history of accepted translations, one independent window per language.
#[derive(Clone, Debug)]
pub struct ContextLedger {
    max_entries: usize,
    histories: BTreeMap<String, LanguageHistory>,
}

impl Default for ContextLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_SIZE)
    }
}

impl ContextLedger {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            histories: BTreeMap::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn append(&mut self, language: &str, source: &str, translation: &str, speaker: Option<&str>) {
        self.window(language).append(source, translation, speaker);
    }

    pub fn window(&mut self, language: &str) -> ContextWindow<'_> {
        let max_entries = self.max_entries;
        let history = self.histories.entry(language.to_string()).or_default();
        ContextWindow::new(history, max_entries)
    }

    pub fn render(&self, language: &str) -> String {
        self.histories
            .get(language)
            .map(LanguageHistory::render)
            .unwrap_or_default()
    }

    pub fn len(&self, language: &str) -> usize {
        self.histories.get(language).map_or(0, LanguageHistory::len)
    }

    pub fn entries(&self, language: &str) -> Vec<&ContextEntry> {
        self.histories
            .get(language)
            .map(|h| h.iter().collect())
            .unwrap_or_default()
    }

    pub fn history(&self, language: &str) -> Option<&LanguageHistory> {
        self.histories.get(language)
    }

    pub fn reset(&mut self) {
        self.histories.clear();
    }

    pub fn reset_language(&mut self, language: &str) {
        self.histories.remove(language);
    }

    /// Detaches a language's history so it can be owned by a single worker.
    pub fn take_language(&mut self, language: &str) -> LanguageHistory {
        self.histories.remove(language).unwrap_or_default()
    }

    pub fn put_language(&mut self, language: &str, history: LanguageHistory) {
        self.histories.insert(language.to_string(), history);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            max_entries: self.max_entries,
            languages: self.histories.clone(),
        }
    }

    /// Replaces all histories; each is trimmed to this ledger's bound.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        self.histories.clear();
        for (lang, hist) in snapshot.languages {
            let mut bounded = LanguageHistory::default();
            for e in hist.entries {
                bounded.push(e, self.max_entries);
            }
            self.histories.insert(lang, bounded);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub max_entries: usize,
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageHistory>,
}

pub fn write_snapshot_file(path: &Path, snapshot: &LedgerSnapshot) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("serialize context ledger")?;
    let mut buf = String::new();
    buf.push('\u{FEFF}');
    buf.push_str(&json);
    std::fs::write(path, buf).with_context(|| format!("write context: {}", path.display()))?;
    Ok(())
}

pub fn read_snapshot_file(path: &Path) -> anyhow::Result<LedgerSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read context: {}", path.display()))?;
    serde_json::from_str(text.trim_start_matches('\u{FEFF}'))
        .with_context(|| format!("parse context: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(ledger: &ContextLedger, lang: &str) -> Vec<String> {
        ledger
            .entries(lang)
            .iter()
            .map(|e| e.source.clone())
            .collect()
    }

    #[test]
    fn evicts_oldest_first() {
        let mut ledger = ContextLedger::new(2);
        ledger.append("英文", "a", "A", None);
        ledger.append("英文", "b", "B", None);
        ledger.append("英文", "c", "C", None);
        assert_eq!(sources(&ledger, "英文"), vec!["b", "c"]);
    }

    #[test]
    fn never_exceeds_bound() {
        let mut ledger = ContextLedger::new(3);
        for i in 0..20 {
            ledger.append("日文", &i.to_string(), "x", None);
            assert!(ledger.len("日文") <= 3);
        }
        assert_eq!(sources(&ledger, "日文"), vec!["17", "18", "19"]);
    }

    #[test]
    fn languages_do_not_touch_each_other() {
        let mut ledger = ContextLedger::new(5);
        ledger.append("英文", "你好", "Hello", Some("艾莉"));
        let before = ledger.render("英文");
        ledger.append("日文", "你好", "こんにちは", None);
        ledger.reset_language("日文");
        assert_eq!(ledger.render("英文"), before);
        assert_eq!(ledger.len("日文"), 0);
    }

    #[test]
    fn render_is_empty_without_history() {
        let ledger = ContextLedger::new(5);
        assert_eq!(ledger.render("英文"), "");
    }

    #[test]
    fn render_shows_speaker_when_present() {
        let mut ledger = ContextLedger::new(5);
        ledger.append("英文", "你好", "Hello", Some("艾莉"));
        ledger.append("英文", "走吧", "Let's go", None);
        assert_eq!(
            ledger.render("英文"),
            "1. [艾莉] Source: 你好\n   Translation: Hello\n2. Source: 走吧\n   Translation: Let's go\n"
        );
    }

    #[test]
    fn take_and_put_round_trip() {
        let mut ledger = ContextLedger::new(5);
        ledger.append("英文", "a", "A", None);
        let mut hist = ledger.take_language("英文");
        assert_eq!(ledger.len("英文"), 0);
        hist.push(
            ContextEntry {
                source: "b".into(),
                translation: "B".into(),
                speaker: None,
            },
            ledger.max_entries(),
        );
        ledger.put_language("英文", hist);
        assert_eq!(sources(&ledger, "英文"), vec!["a", "b"]);
    }

    #[test]
    fn snapshot_file_restores_within_bound() {
        let mut ledger = ContextLedger::new(4);
        for s in ["a", "b", "c", "d"] {
            ledger.append("英文", s, &s.to_uppercase(), Some("艾莉"));
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("context.json");
        write_snapshot_file(&path, &ledger.snapshot()).expect("write");

        let mut smaller = ContextLedger::new(2);
        smaller.restore(read_snapshot_file(&path).expect("read"));
        assert_eq!(sources(&smaller, "英文"), vec!["c", "d"]);
        assert_eq!(smaller.entries("英文")[0].speaker.as_deref(), Some("艾莉"));
    }
}
