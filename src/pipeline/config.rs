use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV, CONFIG_FILENAME};
use crate::models::{OpenAiBackend, OpenAiSettings};
use crate::roles::DEFAULT_SIMILARITY_THRESHOLD;

use super::memory::DEFAULT_CONTEXT_SIZE;
use super::prompts::StyleGuide;
use super::trace::TraceWriter;
use super::translator::{GenerationSettings, RetryPolicy, DEFAULT_MAX_RETRIES};

pub const DEFAULT_TEXT_COLUMN: &str = "文本";
pub const DEFAULT_SPEAKER_COLUMN: &str = "角色";
pub const DEFAULT_TERM_SOURCE_COLUMN: &str = "中文";
pub const DEFAULT_DESCRIPTION_COLUMN: &str = "性格";

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub languages: Option<Vec<String>>,
    pub requirements: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub max_retries: Option<u32>,
    pub trace_prompts: Option<bool>,
}

/// Fully resolved settings for one run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,

    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub generation: GenerationSettings,
    pub retry: RetryPolicy,

    pub languages: Vec<String>,
    pub requirements: String,
    pub context_size: usize,
    pub reset_context_every: usize,
    pub fuzzy_matching: bool,
    pub similarity_threshold: f64,
    pub failure_marker: Option<String>,
    pub parallel_languages: bool,
    pub log_max_chars: usize,

    pub text_column: String,
    pub speaker_column: String,
    pub term_source_column: String,
    pub term_columns: BTreeMap<String, String>,
    pub role_column: String,
    pub description_column: String,

    pub role_mapping: BTreeMap<String, String>,
    pub rejected_roles: Vec<String>,

    pub styles: BTreeMap<String, String>,
    pub system_prompt: Option<String>,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
}

impl PipelineConfig {
    pub fn from_file_and_args(
        input: &Path,
        config_path: Option<PathBuf>,
        overrides: CliOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                tracing::info!(path = %p.display(), "config loaded");
            } else {
                tracing::warn!(path = %p.display(), "config file not found; using defaults");
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        Self::resolve(file_cfg, cfg_path, &workdir, overrides)
    }

    pub fn resolve(
        file_cfg: AppConfig,
        config_path: PathBuf,
        workdir: &Path,
        overrides: CliOverrides,
    ) -> anyhow::Result<Self> {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let b = file_cfg.backend;
        let t = file_cfg.translation;

        let endpoint = overrides
            .endpoint
            .or(b.endpoint)
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = b.api_key.filter(|k| !k.trim().is_empty()).or_else(|| {
            let var = b
                .api_key_env
                .clone()
                .unwrap_or_else(|| "OPENAI_API_KEY".to_string());
            std::env::var(var).ok()
        });
        let generation = GenerationSettings {
            model: overrides
                .model
                .or(b.model)
                .unwrap_or_else(|| GenerationSettings::default().model),
            temperature: b.temperature.unwrap_or(0.3),
            max_tokens: b.max_tokens.unwrap_or(1024).max(16),
        };
        let retry = RetryPolicy {
            max_retries: overrides
                .max_retries
                .or(t.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES)
                .max(1),
            backoff_unit: Duration::from_millis(t.backoff_unit_ms.unwrap_or(1000)),
        };

        let languages: Vec<String> = overrides
            .languages
            .or(t.languages)
            .unwrap_or_else(|| vec!["英文".to_string()])
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        let mut term_columns = file_cfg.terminology.columns;
        for lang in &languages {
            term_columns
                .entry(lang.clone())
                .or_insert_with(|| lang.clone());
        }

        let system_prompt = match file_cfg.prompts.system.as_deref() {
            Some(rel) => {
                let mut p = PathBuf::from(rel);
                if p.is_relative() {
                    p = config_dir.join(p);
                }
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("read system prompt: {}", p.display()))?;
                Some(text)
            }
            None => None,
        };

        let trace_dir = file_cfg
            .trace
            .dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            workdir.join(trace_dir)
        };

        Ok(Self {
            config_path,
            endpoint,
            api_key,
            timeout: Duration::from_secs(b.timeout_secs.unwrap_or(60).max(1)),
            generation,
            retry,
            languages,
            requirements: overrides.requirements.or(t.requirements).unwrap_or_default(),
            context_size: t.context_size.unwrap_or(DEFAULT_CONTEXT_SIZE),
            reset_context_every: t.reset_context_every.unwrap_or(0),
            fuzzy_matching: t.fuzzy_matching.unwrap_or(true),
            similarity_threshold: t
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            failure_marker: t.failure_marker.filter(|m| !m.is_empty()),
            parallel_languages: t.parallel_languages.unwrap_or(false),
            log_max_chars: t.log_max_chars.unwrap_or(240),
            text_column: non_empty_or(file_cfg.columns.text, DEFAULT_TEXT_COLUMN),
            speaker_column: non_empty_or(file_cfg.columns.speaker, DEFAULT_SPEAKER_COLUMN),
            term_source_column: non_empty_or(
                file_cfg.terminology.source_column,
                DEFAULT_TERM_SOURCE_COLUMN,
            ),
            term_columns,
            role_column: non_empty_or(file_cfg.personality.role_column, DEFAULT_SPEAKER_COLUMN),
            description_column: non_empty_or(
                file_cfg.personality.description_column,
                DEFAULT_DESCRIPTION_COLUMN,
            ),
            role_mapping: file_cfg.roles.mapping,
            rejected_roles: file_cfg.roles.rejected,
            styles: file_cfg.styles,
            system_prompt,
            trace_dir,
            trace_prompts: overrides
                .trace_prompts
                .or(file_cfg.trace.prompts)
                .unwrap_or(false),
        })
    }

    /// Target column per configured language, in language order.
    pub fn language_columns(&self) -> BTreeMap<String, String> {
        self.languages
            .iter()
            .map(|l| {
                let col = self.term_columns.get(l).cloned().unwrap_or_else(|| l.clone());
                (l.clone(), col)
            })
            .collect()
    }

    pub fn style_guide(&self) -> StyleGuide {
        StyleGuide::with_overrides(self.styles.clone())
            .with_system_template(self.system_prompt.clone())
    }

    pub fn build_backend(&self) -> anyhow::Result<OpenAiBackend> {
        if self.api_key.is_none() {
            tracing::warn!(endpoint = self.endpoint.as_str(), "no API key configured");
        }
        OpenAiBackend::new(OpenAiSettings {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout,
        })
    }

    pub fn trace_writer(&self) -> TraceWriter {
        TraceWriter::new(self.trace_dir.clone(), self.trace_prompts).unwrap_or_else(|err| {
            tracing::warn!("prompt trace disabled: {err:#}");
            TraceWriter::disabled()
        })
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[backend]
endpoint = "https://api.openai.com/v1"
# api_key = "sk-..."
api_key_env = "OPENAI_API_KEY"
model = "gpt-4o-mini"
temperature = 0.3
max_tokens = 1024
timeout_secs = 60

[translation]
languages = ["英文", "日文"]
max_retries = 3
# One backoff unit; waits are min(2^attempt, 60) units.
backoff_unit_ms = 1000
# Rolling context window per language.
context_size = 10
fuzzy_matching = true
similarity_threshold = 0.6
requirements = ""
# Clear context every N rows (0 = never).
reset_context_every = 0
# failure_marker = "【翻译失败】"
parallel_languages = false
log_max_chars = 240

[columns]
text = "文本"
speaker = "角色"

[terminology]
source_column = "中文"
# Language -> column in the terminology table. Unlisted languages use a column named after the language.
# [terminology.columns]
# 英文 = "English"

[personality]
role_column = "角色"
description_column = "性格"

# Confirmed speaker names (observed -> canonical) and names with no personality.
[roles]
rejected = []
[roles.mapping]
# "艾莉|旁白" = "艾莉"

# Per-language style rules replacing the built-in ones. {{language}} is substituted.
[styles]
# 英文 = "- Use British spelling."

[prompts]
# system = "prompts/system.txt"

[trace]
dir = "_trace"
prompts = false
"#;
