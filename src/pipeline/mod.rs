pub mod config;
pub mod memory;
pub mod prompts;
pub mod sanitize;
pub mod trace;
pub mod translator;

pub use config::{init_default_config, CliOverrides, PipelineConfig};
pub use memory::{ContextEntry, ContextLedger, LedgerSnapshot};
pub use prompts::{compose, ComposedPrompt, StyleGuide};
pub use sanitize::sanitize;
pub use translator::{
    AttemptFailure, CancelFlag, FailureKind, GenerationSettings, Orchestrator, Outcome, RetryPolicy,
    Translated,
};
