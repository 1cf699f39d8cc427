use once_cell::sync::Lazy;
use regex::Regex;

// Kana, CJK ideographs (incl. extension A), Hangul syllables.
const CJK_CLASS: &str = r"\u3040-\u30ff\u3400-\u4dbf\u4e00-\u9fff\uac00-\ud7af";

static WORDLIKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"[\w{CJK_CLASS}]")).expect("wordlike regex"));

// Runs of Latin/digits stay whole; every CJK/kana/hangul character is its own token.
static SCRIPT_RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"[{CJK_CLASS}]|[^\s{CJK_CLASS}]+")).expect("script run regex")
});

/// Word segmentation capability used for terminology matching.
///
/// Implementations may fail (missing dictionary, bad input); callers go through [`tokenize`],
/// which never fails.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn segment(&self, text: &str) -> anyhow::Result<Vec<String>>;
}

/// Segments `text` and keeps only tokens carrying at least one word or CJK character.
///
/// A failing tokenizer degrades to per-character splitting.
pub fn tokenize(tokenizer: &dyn Tokenizer, text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let raw = match tokenizer.segment(text) {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::warn!(
                tokenizer = tokenizer.name(),
                "segmentation failed, falling back to characters: {err:#}"
            );
            split_chars(text)
        }
    };
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| is_wordlike(t))
        .collect()
}

pub fn is_wordlike(token: &str) -> bool {
    WORDLIKE_RE.is_match(token)
}

pub fn split_chars(text: &str) -> Vec<String> {
    text.chars().map(|c| c.to_string()).collect()
}

/// Dictionary-free segmentation: whitespace-delimited runs for alphabetic scripts, one token
/// per character for scripts written without word boundaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptTokenizer;

impl Tokenizer for ScriptTokenizer {
    fn name(&self) -> &str {
        "script"
    }

    fn segment(&self, text: &str) -> anyhow::Result<Vec<String>> {
        Ok(SCRIPT_RUN_RE
            .find_iter(text)
            .flat_map(|m| split_punctuation(m.as_str()))
            .collect())
    }
}

fn split_punctuation(run: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in run.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '\'' || ch == '-' {
            cur.push(ch);
        } else {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            out.push(ch.to_string());
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(feature = "jieba")]
pub struct JiebaTokenizer {
    inner: jieba_rs::Jieba,
}

#[cfg(feature = "jieba")]
impl JiebaTokenizer {
    pub fn new() -> Self {
        Self {
            inner: jieba_rs::Jieba::new(),
        }
    }
}

#[cfg(feature = "jieba")]
impl Default for JiebaTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "jieba")]
impl Tokenizer for JiebaTokenizer {
    fn name(&self) -> &str {
        "jieba"
    }

    fn segment(&self, text: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .inner
            .cut(text, true)
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}

/// The best tokenizer compiled into this build.
pub fn default_tokenizer() -> Box<dyn Tokenizer> {
    #[cfg(feature = "jieba")]
    {
        Box::new(JiebaTokenizer::new())
    }
    #[cfg(not(feature = "jieba"))]
    {
        Box::new(ScriptTokenizer)
    }
}
