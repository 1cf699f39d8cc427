use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::models::CompletionBackend;
use crate::pipeline::memory::{ContextLedger, ContextWindow, LanguageHistory};
use crate::pipeline::prompts::ComposedPrompt;
use crate::pipeline::translator::{AttemptFailure, Orchestrator, Outcome, RowContext, Translated};
use crate::roles::{AmbiguityReport, PersonalityLoadReport, RoleResolver};
use crate::table::{DialogueRow, Table};
use crate::terminology::{TermLoadReport, TermMatches, TerminologyIndex};
use crate::tokenize::{default_tokenizer, Tokenizer};

/// Prompt-only mode's context reset interval when `reset_context_every` is 0.
pub const PROMPT_BATCH_ROWS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("speaker names awaiting confirmation: {}", .0.join(", "))]
    UnconfirmedRoles(Vec<String>),
    #[error("missing column {column:?} ({rows} rows affected)")]
    MissingColumn { column: String, rows: usize },
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub context_size: usize,
    pub similarity_threshold: f64,
    pub fuzzy_matching: bool,
    pub requirements: String,
    /// Clear each language's context every N rows (0 = never).
    pub reset_context_every: usize,
    pub parallel_languages: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            context_size: crate::pipeline::memory::DEFAULT_CONTEXT_SIZE,
            similarity_threshold: crate::roles::DEFAULT_SIMILARITY_THRESHOLD,
            fuzzy_matching: true,
            requirements: String::new(),
            reset_context_every: 0,
            parallel_languages: false,
        }
    }
}

/// Per-row outcome handed to the batch callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationReport {
    pub row: usize,
    pub language: String,
    pub source: String,
    pub translation: String,
    pub outcome: Outcome,
    pub attempts: u32,
    pub last_error: Option<AttemptFailure>,
}

/// Results for one language of a batch. `cells[i]` is `None` when row `i` had no text or was
/// never reached because of cancellation.
#[derive(Clone, Debug, Default)]
pub struct LanguageRun {
    pub language: String,
    pub cells: Vec<Option<String>>,
    pub accepted: usize,
    pub skipped: usize,
    pub exhausted: Vec<usize>,
    pub cancelled: bool,
}

#[derive(Clone, Debug, Default)]
pub struct BatchOutcome {
    pub runs: Vec<LanguageRun>,
}

impl BatchOutcome {
    pub fn cancelled(&self) -> bool {
        self.runs.iter().any(|r| r.cancelled)
    }

    /// (language, row) pairs that kept their source text after exhausting retries.
    pub fn exhausted(&self) -> impl Iterator<Item = (&str, usize)> {
        self.runs
            .iter()
            .flat_map(|r| r.exhausted.iter().map(move |row| (r.language.as_str(), *row)))
    }

    pub fn run(&self, language: &str) -> Option<&LanguageRun> {
        self.runs.iter().find(|r| r.language == language)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRecord {
    pub row: usize,
    pub language: String,
    pub prompt: ComposedPrompt,
}

/// Read-only lookups shared by every language worker.
struct RowLookup<'s> {
    terminology: &'s TerminologyIndex,
    roles: &'s RoleResolver,
    tokenizer: &'s dyn Tokenizer,
    requirements: &'s str,
}

impl<'s> RowLookup<'s> {
    fn terms(&self, text: &str, language: &str) -> TermMatches {
        self.terminology
            .find_matches(self.tokenizer, text, language)
    }

    fn personality(&self, speaker: Option<&str>) -> Option<&'s str> {
        self.roles.resolve_personality(speaker?)
    }

    fn translate<B: CompletionBackend>(
        &self,
        orch: &Orchestrator<B>,
        row: usize,
        text: &str,
        language: &str,
        speaker: Option<&str>,
        window: &mut ContextWindow<'_>,
    ) -> Translated {
        let terms = self.terms(text, language);
        let ctx = RowContext {
            row,
            text,
            language,
            speaker,
            personality: self.personality(speaker),
            terms: &terms,
            requirements: self.requirements,
        };
        orch.translate(&ctx, window)
    }

    fn run_language<B: CompletionBackend>(
        &self,
        orch: &Orchestrator<B>,
        rows: &[DialogueRow],
        language: &str,
        mut window: ContextWindow<'_>,
        reset_every: usize,
        report: &mut dyn FnMut(&TranslationReport),
    ) -> LanguageRun {
        let mut run = LanguageRun {
            language: language.to_string(),
            cells: vec![None; rows.len()],
            ..LanguageRun::default()
        };
        for (i, row) in rows.iter().enumerate() {
            if orch.cancel_flag().is_cancelled() {
                tracing::info!(language, row = i, "cancelled; remaining rows left untranslated");
                run.cancelled = true;
                break;
            }
            if reset_every > 0 && i > 0 && i % reset_every == 0 {
                window.clear();
            }
            let text = row.text.as_deref().unwrap_or("");
            let out = self.translate(orch, i, text, language, row.speaker.as_deref(), &mut window);
            match out.outcome {
                Outcome::Accepted => run.accepted += 1,
                Outcome::Skipped => run.skipped += 1,
                Outcome::Exhausted => run.exhausted.push(i),
                Outcome::Cancelled => run.cancelled = true,
            }
            report(&TranslationReport {
                row: i,
                language: language.to_string(),
                source: text.to_string(),
                translation: out.text.clone(),
                outcome: out.outcome,
                attempts: out.attempts,
                last_error: out.last_error,
            });
            if row.text.is_some() {
                run.cells[i] = Some(out.text);
            }
            if run.cancelled {
                break;
            }
        }
        run
    }
}

/// Terminology, speaker resolution and per-language context for one localization batch.
///
/// Loading and review happen first; [`TranslationSession::begin_batch`] is the barrier after
/// which the lookups are only read.
pub struct TranslationSession {
    terminology: TerminologyIndex,
    roles: RoleResolver,
    ledger: ContextLedger,
    tokenizer: Box<dyn Tokenizer>,
    requirements: String,
    reset_context_every: usize,
    parallel_languages: bool,
    review: Option<AmbiguityReport>,
}

impl TranslationSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            terminology: TerminologyIndex::new(),
            roles: RoleResolver::new(settings.similarity_threshold, settings.fuzzy_matching),
            ledger: ContextLedger::new(settings.context_size),
            tokenizer: default_tokenizer(),
            requirements: settings.requirements,
            reset_context_every: settings.reset_context_every,
            parallel_languages: settings.parallel_languages,
            review: None,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn terminology(&self) -> &TerminologyIndex {
        &self.terminology
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    pub fn ledger(&self) -> &ContextLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ContextLedger {
        &mut self.ledger
    }

    pub fn load_terminology(
        &mut self,
        table: &Table,
        source_column: &str,
        target_columns: &BTreeMap<String, String>,
    ) -> TermLoadReport {
        self.terminology.load(table, source_column, target_columns)
    }

    pub fn load_personalities(
        &mut self,
        table: &Table,
        role_column: &str,
        description_column: &str,
    ) -> PersonalityLoadReport {
        self.roles
            .load_personalities(table, role_column, description_column)
    }

    /// Applies decisions made outside the session, e.g. from a config file.
    pub fn apply_role_decisions<'a>(
        &mut self,
        mapping: impl IntoIterator<Item = (&'a str, &'a str)>,
        rejected: impl IntoIterator<Item = &'a str>,
    ) {
        for (observed, canonical) in mapping {
            self.roles.confirm(observed, canonical);
        }
        for observed in rejected {
            self.roles.reject(observed);
        }
    }

    /// Runs speaker disambiguation over the batch rows. The report is kept until
    /// [`TranslationSession::begin_batch`] finds every entry confirmed or rejected.
    pub fn review(&mut self, rows: &[DialogueRow]) -> &AmbiguityReport {
        let mut seen = HashSet::new();
        let names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.speaker.as_deref())
            .filter(|n| seen.insert(*n))
            .collect();
        let report = self.roles.find_ambiguous(names);
        self.review.insert(report)
    }

    pub fn confirm_role(&mut self, observed: &str, canonical: &str) {
        self.roles.confirm(observed, canonical);
    }

    pub fn reject_role(&mut self, observed: &str) {
        self.roles.reject(observed);
    }

    pub fn unconfirmed_roles(&self) -> Vec<String> {
        self.review
            .as_ref()
            .map(|r| self.roles.unconfirmed(r))
            .unwrap_or_default()
    }

    /// Reviews `rows` unless a review is already pending, then applies the confirmation gate.
    fn gate(&mut self, rows: &[DialogueRow]) -> Result<(), SessionError> {
        if self.review.is_none() {
            self.review(rows);
        }
        self.begin_batch()
    }

    pub fn begin_batch(&self) -> Result<(), SessionError> {
        let pending = self.unconfirmed_roles();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(SessionError::UnconfirmedRoles(pending))
        }
    }

    /// Clears confirmations, rejections and the pending review.
    pub fn reset_roles(&mut self) {
        self.roles.reset();
        self.review = None;
    }

    pub fn reset_context(&mut self) {
        self.ledger.reset();
    }

    fn lookup(&self) -> RowLookup<'_> {
        RowLookup {
            terminology: &self.terminology,
            roles: &self.roles,
            tokenizer: self.tokenizer.as_ref(),
            requirements: &self.requirements,
        }
    }

    pub fn find_terms(&self, text: &str, language: &str) -> TermMatches {
        self.lookup().terms(text, language)
    }

    /// Translates a single cell against this session's context for `language`.
    pub fn translate<B: CompletionBackend>(
        &mut self,
        orch: &Orchestrator<B>,
        row: usize,
        text: &str,
        language: &str,
        speaker: Option<&str>,
    ) -> Translated {
        let lookup = RowLookup {
            terminology: &self.terminology,
            roles: &self.roles,
            tokenizer: self.tokenizer.as_ref(),
            requirements: &self.requirements,
        };
        let mut window = self.ledger.window(language);
        lookup.translate(orch, row, text, language, speaker, &mut window)
    }

    /// Translates every row into every language.
    ///
    /// Rows of one language always run in order against that language's context. With
    /// `parallel_languages` each language runs on its own thread.
    pub fn translate_batch<B, F>(
        &mut self,
        orch: &Orchestrator<B>,
        rows: &[DialogueRow],
        languages: &[String],
        on_report: F,
    ) -> Result<BatchOutcome, SessionError>
    where
        B: CompletionBackend,
        F: FnMut(&TranslationReport) + Send,
    {
        self.gate(rows)?;

        let mut seen = HashSet::new();
        let languages: Vec<&str> = languages
            .iter()
            .map(String::as_str)
            .filter(|l| seen.insert(*l))
            .collect();
        let max_entries = self.ledger.max_entries();
        let reset_every = self.reset_context_every;
        let parallel = self.parallel_languages && languages.len() > 1;

        let mut histories: Vec<(&str, LanguageHistory)> = languages
            .iter()
            .map(|l| (*l, self.ledger.take_language(l)))
            .collect();
        let lookup = RowLookup {
            terminology: &self.terminology,
            roles: &self.roles,
            tokenizer: self.tokenizer.as_ref(),
            requirements: &self.requirements,
        };

        let runs: Vec<LanguageRun> = if parallel {
            let sink = Mutex::new(on_report);
            std::thread::scope(|s| {
                let handles: Vec<_> = histories
                    .iter_mut()
                    .map(|(lang, history)| {
                        let lookup = &lookup;
                        let sink = &sink;
                        let lang: &str = lang;
                        s.spawn(move || {
                            let mut forward = |r: &TranslationReport| {
                                let mut f = sink.lock().unwrap_or_else(PoisonError::into_inner);
                                (*f)(r);
                            };
                            lookup.run_language(
                                orch,
                                rows,
                                lang,
                                ContextWindow::new(history, max_entries),
                                reset_every,
                                &mut forward,
                            )
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                    .collect()
            })
        } else {
            let mut on_report = on_report;
            let mut runs = Vec::with_capacity(histories.len());
            for (lang, history) in histories.iter_mut() {
                runs.push(lookup.run_language(
                    orch,
                    rows,
                    lang,
                    ContextWindow::new(history, max_entries),
                    reset_every,
                    &mut on_report,
                ));
                if orch.cancel_flag().is_cancelled() {
                    break;
                }
            }
            runs
        };

        for (lang, history) in histories {
            self.ledger.put_language(lang, history);
        }
        Ok(BatchOutcome { runs })
    }

    /// Composes the prompts a batch would send, without calling a backend.
    ///
    /// Nothing is appended to the ledger here, so the context each prompt sees is whatever was
    /// restored beforehand; it is dropped every `reset_context_every` rows, or every
    /// [`PROMPT_BATCH_ROWS`] when no interval is configured.
    pub fn compose_batch<B: CompletionBackend>(
        &mut self,
        orch: &Orchestrator<B>,
        rows: &[DialogueRow],
        languages: &[String],
    ) -> Result<Vec<PromptRecord>, SessionError> {
        self.gate(rows)?;
        let reset_every = match self.reset_context_every {
            0 => PROMPT_BATCH_ROWS,
            n => n,
        };
        let mut out = Vec::new();
        for language in languages {
            for (i, row) in rows.iter().enumerate() {
                if i > 0 && i % reset_every == 0 {
                    self.ledger.reset_language(language);
                }
                let Some(text) = row.text.as_deref().filter(|t| !t.trim().is_empty()) else {
                    continue;
                };
                let lookup = self.lookup();
                let terms = lookup.terms(text, language);
                let ctx = RowContext {
                    row: i,
                    text,
                    language,
                    speaker: row.speaker.as_deref(),
                    personality: lookup.personality(row.speaker.as_deref()),
                    terms: &terms,
                    requirements: lookup.requirements,
                };
                let prompt = orch.compose(&ctx, &self.ledger.render(language));
                out.push(PromptRecord {
                    row: i,
                    language: language.clone(),
                    prompt,
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendError, CompletionRequest};
    use crate::pipeline::prompts::StyleGuide;
    use crate::pipeline::translator::tests::{fast_policy, ScriptedBackend};
    use crate::pipeline::translator::GenerationSettings;

    /// Fails every request for one language and answers the rest.
    struct FailingLanguage(&'static str);

    impl CompletionBackend for FailingLanguage {
        fn name(&self) -> &str {
            "failing-language"
        }

        fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError> {
            if request.user.contains(&format!("## {} style rules", self.0)) {
                Err(BackendError::Network("connection reset".into()))
            } else {
                Ok("Translated line".into())
            }
        }
    }

    fn rows(lines: &[(&str, Option<&str>)]) -> Vec<DialogueRow> {
        lines
            .iter()
            .map(|(t, s)| DialogueRow {
                text: Some(t.to_string()),
                speaker: s.map(str::to_string),
            })
            .collect()
    }

    fn langs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn orchestrator<B: CompletionBackend>(backend: B, retries: u32) -> Orchestrator<B> {
        Orchestrator::new(
            backend,
            StyleGuide::new(),
            GenerationSettings::default(),
            fast_policy(retries),
        )
    }

    fn session_with_personality() -> TranslationSession {
        let mut session = TranslationSession::new(SessionSettings::default());
        let mut table = Table::new(vec!["角色".into(), "性格".into()]);
        table.push_row([Some("艾莉"), Some("活泼开朗")]);
        table.push_row([Some("班长"), Some("严肃认真")]);
        let report = session.load_personalities(&table, "角色", "性格");
        assert_eq!(report.loaded, 2);
        session
    }

    #[test]
    fn terms_and_personality_reach_the_prompt() {
        let mut session = session_with_personality();
        let mut terms = Table::new(vec!["中文".into(), "英文".into()]);
        terms.push_row([Some("班长"), Some("Monitor")]);
        let mut cols = BTreeMap::new();
        cols.insert("英文".to_string(), "英文".to_string());
        assert_eq!(session.load_terminology(&terms, "中文", &cols).total_loaded(), 1);

        let backend = ScriptedBackend::new(vec![Ok("The monitor is here".into())]);
        let orch = orchestrator(&backend, 1);
        let out = session.translate(&orch, 0, "班长来了", "英文", Some("艾莉"));
        assert_eq!(out.outcome, Outcome::Accepted);
        let prompt = backend.last_prompt();
        assert!(prompt.contains("- 班长 => Monitor"));
        assert!(prompt.contains("Personality: 活泼开朗"));
        assert_eq!(session.ledger().len("英文"), 1);
    }

    #[test]
    fn unconfirmed_names_block_the_batch() {
        let mut session = session_with_personality();
        let batch = rows(&[("你好", Some("艾莉酱")), ("走吧", Some("艾莉"))]);
        let report = session.review(&batch);
        assert!(report.get("艾莉酱").is_some());
        assert!(report.get("艾莉").is_none());

        let backend = ScriptedBackend::new(Vec::new());
        let orch = orchestrator(&backend, 1);
        let err = session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect_err("gated");
        assert_eq!(err, SessionError::UnconfirmedRoles(vec!["艾莉酱".into()]));
        assert_eq!(backend.calls(), 0);

        session.confirm_role("艾莉酱", "艾莉");
        assert!(session.begin_batch().is_ok());
        assert_eq!(session.roles().resolve_personality("艾莉酱"), Some("活泼开朗"));
    }

    #[test]
    fn rejected_names_unblock_without_personality() {
        let mut session = session_with_personality();
        let batch = rows(&[("你好", Some("艾莉酱"))]);
        session.review(&batch);
        session.reject_role("艾莉酱");
        assert!(session.begin_batch().is_ok());
        assert_eq!(session.roles().resolve_personality("艾莉酱"), None);
    }

    #[test]
    fn failing_language_leaves_the_other_intact() {
        let mut session = TranslationSession::new(SessionSettings::default());
        let orch = orchestrator(FailingLanguage("日文"), 2);
        let batch = rows(&[("你好", None), ("再见", None)]);
        let mut reports = Vec::new();
        let outcome = session
            .translate_batch(&orch, &batch, &langs(&["英文", "日文"]), |r| {
                reports.push((r.language.clone(), r.outcome))
            })
            .expect("batch");

        let en = outcome.run("英文").expect("en");
        assert_eq!(en.accepted, 2);
        assert_eq!(en.cells[1].as_deref(), Some("Translated line"));
        let ja = outcome.run("日文").expect("ja");
        assert_eq!(ja.exhausted, vec![0, 1]);
        assert_eq!(ja.cells[0].as_deref(), Some("你好"));

        assert_eq!(session.ledger().len("英文"), 2);
        assert_eq!(session.ledger().len("日文"), 0);
        assert_eq!(outcome.exhausted().count(), 2);
        assert_eq!(reports.len(), 4);
    }

    #[test]
    fn parallel_languages_match_sequential_results() {
        let settings = SessionSettings {
            parallel_languages: true,
            ..SessionSettings::default()
        };
        let mut session = TranslationSession::new(settings);
        let orch = orchestrator(FailingLanguage("韩文"), 1);
        let batch = rows(&[("一", None), ("二", None), ("三", None)]);
        let mut count = 0usize;
        let outcome = session
            .translate_batch(&orch, &batch, &langs(&["英文", "日文", "韩文"]), |_| count += 1)
            .expect("batch");
        assert_eq!(count, 9);
        assert_eq!(outcome.run("英文").map(|r| r.accepted), Some(3));
        assert_eq!(outcome.run("日文").map(|r| r.accepted), Some(3));
        assert_eq!(outcome.run("韩文").map(|r| r.exhausted.len()), Some(3));
        assert_eq!(session.ledger().len("日文"), 3);
        assert_eq!(session.ledger().len("韩文"), 0);
    }

    #[test]
    fn missing_text_and_cancellation() {
        let mut session = TranslationSession::new(SessionSettings::default());
        let backend = ScriptedBackend::with_fallback(Vec::new(), Ok("Line".into()));
        let orch = orchestrator(&backend, 1);
        let batch = vec![
            DialogueRow {
                text: None,
                speaker: None,
            },
            DialogueRow {
                text: Some("你好".into()),
                speaker: None,
            },
        ];
        let outcome = session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect("batch");
        let en = outcome.run("英文").expect("en");
        assert_eq!(en.cells, vec![None, Some("Line".to_string())]);
        assert_eq!(en.skipped, 1);

        orch.cancel_flag().cancel();
        let outcome = session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect("batch");
        assert!(outcome.cancelled());
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn context_resets_every_chunk() {
        let settings = SessionSettings {
            reset_context_every: 2,
            ..SessionSettings::default()
        };
        let mut session = TranslationSession::new(settings);
        let backend = ScriptedBackend::with_fallback(Vec::new(), Ok("Line".into()));
        let orch = orchestrator(&backend, 1);
        let batch = rows(&[("一", None), ("二", None), ("三", None)]);
        session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect("batch");
        assert_eq!(session.ledger().len("英文"), 1);
        assert!(!backend.last_prompt().contains("## Previous lines"));
    }

    #[test]
    fn compose_batch_makes_no_calls() {
        let mut session = session_with_personality();
        session.ledger_mut().append("英文", "早", "Morning", None);
        let backend = ScriptedBackend::new(Vec::new());
        let orch = orchestrator(&backend, 1);
        let batch = rows(&[("你好", Some("艾莉")), ("  ", None)]);
        let prompts = session
            .compose_batch(&orch, &batch, &langs(&["英文", "日文"]))
            .expect("compose");
        assert_eq!(backend.calls(), 0);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].prompt.user.contains("Translation: Morning"));
        assert!(!prompts[1].prompt.user.contains("## Previous lines"));
    }

    #[test]
    fn batch_reviews_rows_when_no_review_is_pending() {
        let mut session = session_with_personality();
        let batch = rows(&[("你好", Some("艾莉酱"))]);
        let backend = ScriptedBackend::new(Vec::new());
        let orch = orchestrator(&backend, 1);

        let err = session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect_err("gated");
        assert_eq!(err, SessionError::UnconfirmedRoles(vec!["艾莉酱".into()]));
        let err = session
            .compose_batch(&orch, &batch, &langs(&["英文"]))
            .expect_err("gated");
        assert_eq!(err, SessionError::UnconfirmedRoles(vec!["艾莉酱".into()]));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn reset_roles_forgets_decisions_and_review() {
        let mut session = session_with_personality();
        let batch = rows(&[("你好", Some("艾莉酱"))]);
        session.review(&batch);
        session.confirm_role("艾莉酱", "艾莉");
        assert!(session.begin_batch().is_ok());

        session.reset_roles();
        assert_eq!(session.roles().mapped("艾莉酱"), None);
        assert!(session.unconfirmed_roles().is_empty());

        let backend = ScriptedBackend::new(Vec::new());
        let orch = orchestrator(&backend, 1);
        let err = session
            .translate_batch(&orch, &batch, &langs(&["英文"]), |_| {})
            .expect_err("reviewed again");
        assert_eq!(err, SessionError::UnconfirmedRoles(vec!["艾莉酱".into()]));
    }

    #[test]
    fn reset_context_clears_every_language() {
        let mut session = TranslationSession::new(SessionSettings::default());
        session.ledger_mut().append("英文", "早", "Morning", None);
        session.ledger_mut().append("日文", "早", "おはよう", Some("艾莉"));
        session.reset_context();
        assert_eq!(session.ledger().len("英文"), 0);
        assert_eq!(session.ledger().len("日文"), 0);
    }

    /// Whitespace words, lowercased.
    struct LowercaseWords;

    impl Tokenizer for LowercaseWords {
        fn name(&self) -> &str {
            "lowercase-words"
        }

        fn segment(&self, text: &str) -> anyhow::Result<Vec<String>> {
            Ok(text.split_whitespace().map(str::to_lowercase).collect())
        }
    }

    #[test]
    fn injected_tokenizer_drives_term_lookup() {
        let mut terms = Table::new(vec!["中文".into(), "英文".into()]);
        terms.push_row([Some("hp"), Some("Health")]);
        let mut cols = BTreeMap::new();
        cols.insert("英文".to_string(), "英文".to_string());

        let mut plain = TranslationSession::new(SessionSettings::default());
        plain.load_terminology(&terms, "中文", &cols);
        assert!(plain.find_terms("HP up", "英文").is_empty());

        let mut session =
            TranslationSession::new(SessionSettings::default()).with_tokenizer(Box::new(LowercaseWords));
        session.load_terminology(&terms, "中文", &cols);
        let found = session.find_terms("HP up", "英文");
        assert_eq!(found.get("hp"), Some(&vec!["Health".to_string()]));
    }

    #[test]
    fn prompt_only_context_drops_after_a_batch_of_rows() {
        let mut session = TranslationSession::new(SessionSettings::default());
        session.ledger_mut().append("英文", "早", "Morning", None);
        let backend = ScriptedBackend::new(Vec::new());
        let orch = orchestrator(&backend, 1);
        let lines = vec![("行", None); PROMPT_BATCH_ROWS + 1];
        let prompts = session
            .compose_batch(&orch, &rows(&lines), &langs(&["英文"]))
            .expect("compose");
        assert_eq!(prompts.len(), PROMPT_BATCH_ROWS + 1);
        assert!(prompts[PROMPT_BATCH_ROWS - 1].prompt.user.contains("Translation: Morning"));
        assert!(!prompts[PROMPT_BATCH_ROWS].prompt.user.contains("Translation: Morning"));
    }

    #[test]
    fn unconfirmed_error_names_the_speakers() {
        let err = SessionError::UnconfirmedRoles(vec!["甲".into(), "乙".into()]);
        assert_eq!(err.to_string(), "speaker names awaiting confirmation: 甲, 乙");
    }
}
