use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::models::{BackendError, CompletionBackend, CompletionRequest};
use crate::terminology::TermMatches;
use crate::textutil::{char_len, excerpt};

use super::memory::ContextWindow;
use super::prompts::{compose, ComposedPrompt, PromptInput, StyleGuide};
use super::sanitize::sanitize;
use super::trace::TraceWriter;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_BACKOFF_UNITS: u32 = 60;

/// Replies shorter than `source / MIN_LENGTH_DIVISOR` characters are treated as truncated.
const MIN_LENGTH_DIVISOR: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Network,
    Timeout,
    Malformed,
    QualityRejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
            Self::QualityRejected => "quality_rejected",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl AttemptFailure {
    fn rejected(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::QualityRejected,
            detail: detail.into(),
        }
    }
}

impl From<BackendError> for AttemptFailure {
    fn from(err: BackendError) -> Self {
        let kind = match &err {
            BackendError::Network(_) => FailureKind::Network,
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::Malformed(_) => FailureKind::Malformed,
        };
        let detail = match err {
            BackendError::Network(d) | BackendError::Timeout(d) | BackendError::Malformed(d) => d,
        };
        Self { kind, detail }
    }
}

/// Rejects empty replies and replies under a tenth of the source length.
pub fn check_acceptance(source: &str, reply: &str) -> Result<(), AttemptFailure> {
    let got = char_len(reply);
    if got == 0 {
        return Err(AttemptFailure::rejected("empty reply"));
    }
    let src = char_len(source);
    if got * MIN_LENGTH_DIVISOR < src {
        return Err(AttemptFailure::rejected(format!(
            "reply too short: {got} chars for {src} source chars"
        )));
    }
    Ok(())
}

/// Wait after the failed attempt with 0-based index `attempt`: `min(2^attempt, 60)` units.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    let units = 2u32
        .checked_pow(attempt)
        .unwrap_or(MAX_BACKOFF_UNITS)
        .min(MAX_BACKOFF_UNITS);
    unit.checked_mul(units).unwrap_or(Duration::MAX)
}

/// Shared stop signal. Checked before each row and each retry; never interrupts a call in flight.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Blank source; nothing sent.
    Skipped,
    Accepted,
    /// Every attempt failed; the source text is returned.
    Exhausted,
    /// Stopped before a further attempt; the source text is returned.
    Cancelled,
}

/// Resolved inputs for one (row, language) translation.
#[derive(Clone, Copy, Debug)]
pub struct RowContext<'a> {
    pub row: usize,
    pub text: &'a str,
    pub language: &'a str,
    pub speaker: Option<&'a str>,
    pub personality: Option<&'a str>,
    pub terms: &'a TermMatches,
    pub requirements: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Translated {
    pub text: String,
    pub outcome: Outcome,
    pub attempts: u32,
    pub last_error: Option<AttemptFailure>,
}

impl Translated {
    fn passthrough(source: &str, outcome: Outcome, attempts: u32, last_error: Option<AttemptFailure>) -> Self {
        Self {
            text: source.to_string(),
            outcome,
            attempts,
            last_error,
        }
    }
}

/// Drives compose -> call -> validate -> retry for single rows against one backend.
pub struct Orchestrator<B> {
    backend: B,
    style: StyleGuide,
    generation: GenerationSettings,
    policy: RetryPolicy,
    trace: TraceWriter,
    cancel: CancelFlag,
    log_max_chars: usize,
}

impl<B: CompletionBackend> Orchestrator<B> {
    pub fn new(backend: B, style: StyleGuide, generation: GenerationSettings, policy: RetryPolicy) -> Self {
        Self {
            backend,
            style,
            generation,
            policy,
            trace: TraceWriter::disabled(),
            cancel: CancelFlag::new(),
            log_max_chars: 240,
        }
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_log_max_chars(mut self, n: usize) -> Self {
        self.log_max_chars = n.max(16);
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn compose(&self, row: &RowContext<'_>, context: &str) -> ComposedPrompt {
        compose(
            &self.style,
            &PromptInput {
                text: row.text,
                language: row.language,
                speaker: row.speaker,
                personality: row.personality,
                terms: row.terms,
                context,
                requirements: row.requirements,
            },
        )
    }

    /// Translates one row; on acceptance the sanitized text is appended to `window`.
    ///
    /// Never fails: blank input is returned as is, and exhaustion or cancellation returns the
    /// source text with the matching [`Outcome`].
    pub fn translate(&self, row: &RowContext<'_>, window: &mut ContextWindow<'_>) -> Translated {
        if row.text.trim().is_empty() {
            return Translated::passthrough(row.text, Outcome::Skipped, 0, None);
        }

        let prompt = self.compose(row, &window.render());
        if let Err(err) = self.trace.write_prompt(row.row, row.language, &prompt) {
            tracing::debug!("prompt trace skipped: {err:#}");
        }

        let max = self.policy.max_retries.max(1);
        let mut last_error: Option<AttemptFailure> = None;
        for attempt in 0..max {
            if attempt > 0 {
                if self.cancel.is_cancelled() {
                    tracing::info!(row = row.row, language = row.language, "cancelled before retry");
                    return Translated::passthrough(row.text, Outcome::Cancelled, attempt, last_error);
                }
                std::thread::sleep(backoff_delay(attempt - 1, self.policy.backoff_unit));
            }

            match self.attempt(row, &prompt, attempt + 1) {
                Ok(text) => {
                    window.append(row.text, &text, row.speaker);
                    tracing::debug!(
                        row = row.row,
                        language = row.language,
                        attempt = attempt + 1,
                        "accepted: {}",
                        excerpt(&text, self.log_max_chars)
                    );
                    return Translated {
                        text,
                        outcome: Outcome::Accepted,
                        attempts: attempt + 1,
                        last_error,
                    };
                }
                Err(failure) => {
                    tracing::warn!(
                        row = row.row,
                        language = row.language,
                        attempt = attempt + 1,
                        max_attempts = max,
                        kind = %failure.kind,
                        "attempt failed: {}",
                        excerpt(&failure.detail, self.log_max_chars)
                    );
                    last_error = Some(failure);
                }
            }
        }

        tracing::warn!(
            row = row.row,
            language = row.language,
            attempts = max,
            "retries exhausted; keeping source text: {}",
            excerpt(row.text, self.log_max_chars)
        );
        Translated::passthrough(row.text, Outcome::Exhausted, max, last_error)
    }

    fn attempt(&self, row: &RowContext<'_>, prompt: &ComposedPrompt, attempt: u32) -> Result<String, AttemptFailure> {
        let raw = self.backend.complete(&CompletionRequest {
            system: &prompt.system,
            user: &prompt.user,
            model: &self.generation.model,
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
        })?;
        if let Err(err) = self.trace.write_reply(row.row, row.language, attempt, &raw) {
            tracing::debug!("reply trace skipped: {err:#}");
        }

        check_acceptance(row.text, &raw)?;
        let cleaned = sanitize(&raw, row.language);
        if cleaned.is_empty() {
            return Err(AttemptFailure::rejected("reply empty after cleanup"));
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::memory::ContextLedger;

    /// Replays scripted replies and records every request it receives.
    pub(crate) struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        fallback: Result<String, BackendError>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(replies: Vec<Result<String, BackendError>>) -> Self {
            Self::with_fallback(replies, Err(BackendError::Malformed("script exhausted".into())))
        }

        pub(crate) fn with_fallback(
            replies: Vec<Result<String, BackendError>>,
            fallback: Result<String, BackendError>,
        ) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().expect("lock").len()
        }

        pub(crate) fn last_prompt(&self) -> String {
            self.prompts
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .unwrap_or_default()
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError> {
            self.prompts
                .lock()
                .expect("lock")
                .push(request.user.to_string());
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub(crate) fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_unit: Duration::ZERO,
        }
    }

    fn orchestrator(backend: &ScriptedBackend, max_retries: u32) -> Orchestrator<&ScriptedBackend> {
        Orchestrator::new(
            backend,
            StyleGuide::new(),
            GenerationSettings::default(),
            fast_policy(max_retries),
        )
    }

    fn row<'a>(text: &'a str, terms: &'a TermMatches) -> RowContext<'a> {
        RowContext {
            row: 1,
            text,
            language: "英文",
            speaker: Some("艾莉"),
            personality: None,
            terms,
            requirements: "",
        }
    }

    #[test]
    fn accepted_reply_is_sanitized_and_recorded() {
        let backend = ScriptedBackend::new(vec![Ok("\"Hello\"".into())]);
        let orch = orchestrator(&backend, 3);
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        let out = orch.translate(&row("你好", &terms), &mut ledger.window("英文"));
        assert_eq!(out.text, "Hello");
        assert_eq!(out.outcome, Outcome::Accepted);
        assert_eq!(out.attempts, 1);
        let entries = ledger.entries("英文");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].translation, "Hello");
        assert_eq!(entries[0].speaker.as_deref(), Some("艾莉"));
    }

    #[test]
    fn timeouts_exhaust_after_exactly_max_attempts() {
        let backend = ScriptedBackend::with_fallback(
            Vec::new(),
            Err(BackendError::Timeout("60s elapsed".into())),
        );
        let orch = orchestrator(&backend, 3);
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        let out = orch.translate(&row("班长来了", &terms), &mut ledger.window("英文"));
        assert_eq!(backend.calls(), 3);
        assert_eq!(out.text, "班长来了");
        assert_eq!(out.outcome, Outcome::Exhausted);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.last_error.map(|e| e.kind), Some(FailureKind::Timeout));
        assert_eq!(ledger.len("英文"), 0);
    }

    #[test]
    fn mixed_failures_share_one_budget() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Network("connection refused".into())),
            Ok("   ".into()),
            Ok("Finally".into()),
        ]);
        let orch = orchestrator(&backend, 3);
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        let out = orch.translate(&row("终于", &terms), &mut ledger.window("英文"));
        assert_eq!(out.outcome, Outcome::Accepted);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.text, "Finally");
        assert_eq!(
            out.last_error.map(|e| e.kind),
            Some(FailureKind::QualityRejected)
        );
    }

    #[test]
    fn blank_source_skips_the_backend() {
        let backend = ScriptedBackend::new(vec![Ok("x".into())]);
        let orch = orchestrator(&backend, 3);
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        let out = orch.translate(&row("  \n", &terms), &mut ledger.window("英文"));
        assert_eq!(out.outcome, Outcome::Skipped);
        assert_eq!(out.text, "  \n");
        assert_eq!(backend.calls(), 0);
        assert_eq!(ledger.len("英文"), 0);
    }

    #[test]
    fn previous_acceptances_appear_as_context() {
        let backend = ScriptedBackend::new(vec![Ok("Hello".into()), Ok("Bye".into())]);
        let orch = orchestrator(&backend, 1);
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        orch.translate(&row("你好", &terms), &mut ledger.window("英文"));
        assert!(!backend.last_prompt().contains("## Previous lines"));
        orch.translate(&row("再见", &terms), &mut ledger.window("英文"));
        let prompt = backend.last_prompt();
        assert!(prompt.contains("## Previous lines"));
        assert!(prompt.contains("Translation: Hello"));
    }

    #[test]
    fn cancellation_stops_before_the_next_retry() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Network("down".into()))]);
        let orch = orchestrator(&backend, 5);
        orch.cancel_flag().cancel();
        let terms = TermMatches::new();
        let mut ledger = ContextLedger::new(10);
        let out = orch.translate(&row("你好", &terms), &mut ledger.window("英文"));
        assert_eq!(backend.calls(), 1);
        assert_eq!(out.outcome, Outcome::Cancelled);
        assert_eq!(out.text, "你好");
    }

    #[test]
    fn acceptance_predicate() {
        assert!(check_acceptance("你好", "").is_err());
        assert!(check_acceptance("你好", " \n").is_err());
        let long_source = "很".repeat(100);
        assert!(check_acceptance(&long_source, "short").is_err());
        assert!(check_acceptance(&long_source, "0123456789").is_ok());
        assert!(check_acceptance("走", "Go").is_ok());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let unit = Duration::from_millis(1);
        assert_eq!(backoff_delay(0, unit), Duration::from_millis(1));
        assert_eq!(backoff_delay(3, unit), Duration::from_millis(8));
        assert_eq!(backoff_delay(6, unit), Duration::from_millis(60));
        assert_eq!(backoff_delay(40, unit), Duration::from_millis(60));
    }

    #[test]
    fn huge_backoff_unit_saturates() {
        let unit = Duration::from_secs(u64::MAX / 2);
        assert_eq!(backoff_delay(5, unit), Duration::MAX);
    }

    #[test]
    fn backend_errors_keep_their_kind() {
        let f: AttemptFailure = BackendError::Malformed("bad json".into()).into();
        assert_eq!(f.kind, FailureKind::Malformed);
        assert_eq!(f.to_string(), "malformed: bad json");
    }
}
