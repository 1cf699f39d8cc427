use std::path::{Path, PathBuf};

use anyhow::Context;

use super::prompts::ComposedPrompt;

/// Prompt and raw-reply dumps for inspection, one subdirectory per language:
/// `<root>/<language>/row_000012.prompt.txt`, `row_000012.reply.2.txt`.
pub struct TraceWriter {
    root: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(root: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&root)
                .with_context(|| format!("create trace dir: {}", root.display()))?;
        }
        Ok(Self { root, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_prompt(&self, row: usize, language: &str, prompt: &ComposedPrompt) -> anyhow::Result<()> {
        let body = format!("### system\n{}\n\n### user\n{}", prompt.system, prompt.user);
        self.write(language, &format!("row_{row:06}.prompt.txt"), &body)
    }

    pub fn write_reply(&self, row: usize, language: &str, attempt: u32, raw: &str) -> anyhow::Result<()> {
        self.write(language, &format!("row_{row:06}.reply.{attempt}.txt"), raw)
    }

    fn write(&self, language: &str, file_name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let dir = self.root.join(path_component(language));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create trace dir: {}", dir.display()))?;
        let path = dir.join(file_name);
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))
    }
}

// Language names come from user config; keep them to a single safe path segment.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}
