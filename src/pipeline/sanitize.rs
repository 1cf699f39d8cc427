use super::prompts::language_aliases;

const QUOTES: [char; 2] = ['"', '\''];

const LABELS: [&str; 12] = [
    "translation",
    "translated text",
    "translated",
    "result",
    "output",
    "answer",
    "翻译结果",
    "译文",
    "翻译",
    "结果",
    "訳文",
    "翻訳",
];

/// Strips quoting, code fences and label prefixes (`Translation:`, `英文：`, ...) from a
/// backend reply.
///
/// Each pass removes at most one quote pair and one label; passes repeat until nothing changes,
/// so the result is stable under re-application.
pub fn sanitize(text: &str, language: &str) -> String {
    let mut cur = text.trim().to_string();
    loop {
        let next = sanitize_once(&cur, language);
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

fn sanitize_once(text: &str, language: &str) -> String {
    let s = unwrap_code_fence(text.trim());
    let s = strip_quote_pair(s.trim()).trim();
    let s = strip_label_prefix(s, language);
    s.trim().to_string()
}

fn unwrap_code_fence(s: &str) -> &str {
    if !s.starts_with("```") || !s.ends_with("```") || s.len() < 6 {
        return s;
    }
    let inner = &s[3..s.len() - 3];
    // Drop an info string such as ```text
    match inner.find('\n') {
        Some(i) if !inner[..i].trim().contains(' ') => &inner[i + 1..],
        _ => inner,
    }
}

fn strip_quote_pair(s: &str) -> &str {
    for q in QUOTES {
        if s.chars().count() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[q.len_utf8()..s.len() - q.len_utf8()];
        }
    }
    s
}

fn strip_label_prefix<'a>(s: &'a str, language: &str) -> &'a str {
    let lang_labels = std::iter::once(language).chain(language_aliases(language).iter().copied());
    for label in LABELS.iter().copied().chain(lang_labels) {
        if let Some(rest) = strip_label(s, label) {
            return rest;
        }
    }
    s
}

fn strip_label<'a>(s: &'a str, label: &str) -> Option<&'a str> {
    if label.is_empty() {
        return None;
    }
    let head = s.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = s[label.len()..].trim_start_matches([' ', '\t']);
    rest.strip_prefix(':')
        .or_else(|| rest.strip_prefix('：'))
        .map(str::trim_start)
}
