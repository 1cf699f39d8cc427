use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::table::Table;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Score floor applied when one cleaned name contains the other.
const CONTAINMENT_SCORE: f64 = 0.8;

/// Runner-up candidates must reach this fraction of the threshold.
const SECONDARY_FACTOR: f64 = 0.8;

/// Comparison key for speaker names: trimmed, `|annotations` dropped, all whitespace removed.
pub fn clean_name(raw: &str) -> String {
    let s = raw.trim();
    let s = match s.find('|') {
        Some(i) => &s[..i],
        None => s,
    };
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Ratcliff/Obershelp similarity in `[0, 1]`: twice the matched characters over total length.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * matching_chars(&a, &b)) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (i, j, k) = longest_common_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

// Earliest longest common substring as (start_a, start_b, len).
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                cur[j + 1] = prev[j] + 1;
                if cur[j + 1] > best.2 {
                    best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
                }
            }
        }
        prev = cur;
    }
    best
}

fn name_score(observed_clean: &str, canonical_clean: &str) -> f64 {
    let mut score = similarity_ratio(observed_clean, canonical_clean);
    if !observed_clean.is_empty()
        && !canonical_clean.is_empty()
        && (observed_clean.contains(canonical_clean) || canonical_clean.contains(observed_clean))
    {
        score = score.max(CONTAINMENT_SCORE);
    }
    score
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuzzyMatch {
    pub name: Option<String>,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
}

/// A speaker name that needs a reviewer's decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AmbiguousName {
    pub observed: String,
    /// Best-first; the first entry is the automatic match when it reached the threshold.
    pub candidates: Vec<Candidate>,
    pub matched: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AmbiguityReport {
    pub names: Vec<AmbiguousName>,
}

impl AmbiguityReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn get(&self, observed: &str) -> Option<&AmbiguousName> {
        self.names.iter().find(|n| n.observed == observed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersonalityLoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub missing_columns: Vec<String>,
}

/// Maps observed speaker names onto canonical roles and their personality text.
#[derive(Clone, Debug)]
pub struct RoleResolver {
    // Canonical names in table order; first exact hit wins.
    canonical: Vec<String>,
    personalities: HashMap<String, String>,
    mapping: HashMap<String, String>,
    rejected: HashSet<String>,
    threshold: f64,
    fuzzy: bool,
}

impl Default for RoleResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD, true)
    }
}

impl RoleResolver {
    #[must_use]
    pub fn new(threshold: f64, fuzzy: bool) -> Self {
        let threshold = if threshold > 0.0 && threshold <= 1.0 {
            threshold
        } else {
            tracing::warn!(threshold, "similarity threshold out of (0, 1]; using default");
            DEFAULT_SIMILARITY_THRESHOLD
        };
        Self {
            canonical: Vec::new(),
            personalities: HashMap::new(),
            mapping: HashMap::new(),
            rejected: HashSet::new(),
            threshold,
            fuzzy,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn load_personalities(
        &mut self,
        table: &Table,
        role_column: &str,
        description_column: &str,
    ) -> PersonalityLoadReport {
        let mut report = PersonalityLoadReport::default();
        let role_col = table.column_index(role_column);
        let desc_col = table.column_index(description_column);
        for (name, col) in [(role_column, role_col), (description_column, desc_col)] {
            if col.is_none() {
                report.missing_columns.push(name.to_string());
            }
        }
        let (Some(role_col), Some(desc_col)) = (role_col, desc_col) else {
            tracing::warn!(
                missing = ?report.missing_columns,
                rows = table.len(),
                "personality columns missing; nothing loaded"
            );
            report.skipped = table.len();
            return report;
        };

        for row in 0..table.len() {
            match (table.cell(row, role_col), table.cell(row, desc_col)) {
                (Some(role), Some(desc)) => {
                    self.insert_personality(role, desc);
                    report.loaded += 1;
                }
                _ => report.skipped += 1,
            }
        }
        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "personalities loaded"
        );
        report
    }

    pub fn insert_personality(&mut self, role: &str, description: &str) {
        let role = role.trim().to_string();
        if !self.personalities.contains_key(&role) {
            self.canonical.push(role.clone());
        }
        self.personalities.insert(role, description.trim().to_string());
    }

    pub fn clear_personalities(&mut self) {
        self.canonical.clear();
        self.personalities.clear();
    }

    /// Records a reviewer's decision. Mapped names never go through fuzzy matching again.
    pub fn confirm(&mut self, observed: &str, canonical: &str) {
        self.rejected.remove(observed);
        self.mapping
            .insert(observed.to_string(), canonical.to_string());
    }

    /// Marks a name as having no personality; it is never fuzzy-matched.
    pub fn reject(&mut self, observed: &str) {
        self.mapping.remove(observed);
        self.rejected.insert(observed.to_string());
    }

    #[must_use]
    pub fn mapped(&self, observed: &str) -> Option<&str> {
        self.mapping.get(observed).map(String::as_str)
    }

    /// Clears confirmations and rejections; loaded personalities stay.
    pub fn reset(&mut self) {
        self.mapping.clear();
        self.rejected.clear();
    }

    #[must_use]
    pub fn fuzzy_match(&self, observed: &str) -> FuzzyMatch {
        if let Some(canonical) = self.mapping.get(observed) {
            return FuzzyMatch {
                name: Some(canonical.clone()),
                score: 1.0,
            };
        }
        let observed_clean = clean_name(observed);
        let cleaned: Vec<(&String, String)> =
            self.canonical.iter().map(|c| (c, clean_name(c))).collect();

        if let Some((canonical, _)) = cleaned.iter().find(|(_, c)| *c == observed_clean) {
            return FuzzyMatch {
                name: Some((*canonical).clone()),
                score: 1.0,
            };
        }

        let mut best: Option<&String> = None;
        let mut best_score = 0.0f64;
        for (canonical, clean) in &cleaned {
            let score = name_score(&observed_clean, clean);
            if score > best_score {
                best_score = score;
                best = Some(*canonical);
            }
        }
        FuzzyMatch {
            name: best.filter(|_| best_score >= self.threshold).cloned(),
            score: best_score,
        }
    }

    /// Personality text for a speaker, or `None` when no stage resolves it.
    #[must_use]
    pub fn resolve_personality(&self, observed: &str) -> Option<&str> {
        let (_, desc) = self.resolve(observed)?;
        Some(desc)
    }

    /// Canonical role name and personality text for a speaker.
    #[must_use]
    pub fn resolve(&self, observed: &str) -> Option<(&str, &str)> {
        if let Some(canonical) = self.mapping.get(observed) {
            return self
                .personalities
                .get_key_value(canonical)
                .map(|(k, v)| (k.as_str(), v.as_str()));
        }
        if self.rejected.contains(observed) {
            return None;
        }
        if let Some((k, v)) = self.personalities.get_key_value(observed) {
            return Some((k.as_str(), v.as_str()));
        }
        if !self.fuzzy {
            return None;
        }
        let name = self.fuzzy_match(observed).name?;
        self.personalities
            .get_key_value(&name)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Collects speaker names needing confirmation before a batch may run.
    ///
    /// Names whose cleaned form equals a canonical name are mapped directly and not reported.
    pub fn find_ambiguous_names(
        &mut self,
        table: &Table,
        role_column: &str,
    ) -> anyhow::Result<AmbiguityReport> {
        let col = table.column_index(role_column).ok_or_else(|| {
            anyhow::anyhow!(
                "missing role column {role_column:?} ({} rows affected)",
                table.len()
            )
        })?;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut names: Vec<&str> = Vec::new();
        for row in 0..table.len() {
            if let Some(name) = table.cell(row, col) {
                if seen.insert(name) {
                    names.push(name);
                }
            }
        }
        Ok(self.find_ambiguous(names))
    }

    pub fn find_ambiguous<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> AmbiguityReport {
        let mut report = AmbiguityReport::default();
        for observed in names {
            if observed.trim().is_empty()
                || self.mapping.contains_key(observed)
                || self.rejected.contains(observed)
                || self.personalities.contains_key(observed)
                || report.get(observed).is_some()
            {
                continue;
            }
            let m = self.fuzzy_match(observed);
            if m.score >= 1.0 {
                if let Some(canonical) = m.name {
                    tracing::debug!(observed, canonical = canonical.as_str(), "exact role match");
                    self.mapping.insert(observed.to_string(), canonical);
                    continue;
                }
            }

            let observed_clean = clean_name(observed);
            let floor = self.threshold * SECONDARY_FACTOR;
            let mut candidates: Vec<Candidate> = self
                .canonical
                .iter()
                .map(|c| Candidate {
                    name: c.clone(),
                    score: name_score(&observed_clean, &clean_name(c)),
                })
                .filter(|c| c.score >= floor || Some(&c.name) == m.name.as_ref())
                .collect();
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            if let Some(primary) = m.name.as_ref() {
                if let Some(pos) = candidates.iter().position(|c| &c.name == primary) {
                    let c = candidates.remove(pos);
                    candidates.insert(0, c);
                }
            }
            if candidates.is_empty() {
                continue;
            }
            tracing::info!(
                observed,
                matched = m.name.is_some(),
                best = m.score,
                candidates = candidates.len(),
                "speaker needs confirmation"
            );
            report.names.push(AmbiguousName {
                observed: observed.to_string(),
                candidates,
                matched: m.name.is_some(),
            });
        }
        report
    }

    /// Names in `report` that have been neither confirmed nor rejected.
    #[must_use]
    pub fn unconfirmed(&self, report: &AmbiguityReport) -> Vec<String> {
        report
            .names
            .iter()
            .filter(|n| {
                !self.mapping.contains_key(&n.observed) && !self.rejected.contains(&n.observed)
            })
            .map(|n| n.observed.clone())
            .collect()
    }
}
