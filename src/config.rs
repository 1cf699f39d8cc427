use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "script-localizer.toml";
pub const CONFIG_ENV: &str = "SCRIPT_LOCALIZER_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub translation: TranslationSection,
    #[serde(default)]
    pub columns: ColumnsSection,
    #[serde(default)]
    pub terminology: TerminologySection,
    #[serde(default)]
    pub personality: PersonalitySection,
    #[serde(default)]
    pub roles: RolesSection,
    /// Language -> style guidance, replacing the built-in text for that language.
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub trace: TraceSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BackendSection {
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable read when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslationSection {
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Length of one backoff unit in milliseconds.
    #[serde(default)]
    pub backoff_unit_ms: Option<u64>,
    #[serde(default)]
    pub context_size: Option<usize>,
    #[serde(default)]
    pub fuzzy_matching: Option<bool>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub requirements: Option<String>,
    /// Clear the context ledger every N rows (0 = never).
    #[serde(default)]
    pub reset_context_every: Option<usize>,
    /// Written instead of the source text when a row exhausts its retries.
    #[serde(default)]
    pub failure_marker: Option<String>,
    #[serde(default)]
    pub parallel_languages: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ColumnsSection {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TerminologySection {
    #[serde(default)]
    pub source_column: Option<String>,
    /// Language -> target column. Languages not listed use a column named after themselves.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PersonalitySection {
    #[serde(default)]
    pub role_column: Option<String>,
    #[serde(default)]
    pub description_column: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RolesSection {
    /// Observed speaker name -> canonical role, as confirmed by a reviewer.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub rejected: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    /// Optional file holding the system instruction template (`{{language}}` is substituted).
    #[serde(default)]
    pub system: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TraceSection {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub prompts: Option<bool>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 8) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}
