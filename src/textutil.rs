/// First `max_chars` characters of `text` on one line, with a marker when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let count = flat.chars().count();
    if count <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str(&format!("…(+{} chars)", count - max_chars));
    out
}

pub fn char_len(text: &str) -> usize {
    text.trim().chars().count()
}
