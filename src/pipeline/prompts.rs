use std::collections::BTreeMap;

use crate::terminology::{TermMatches, TerminologyIndex};

pub const DEFAULT_SYSTEM_TEXT: &str = "You are a professional video game localization translator. \
You translate script lines into {{language}} while keeping each character's voice, the \
project's terminology and the flow of the conversation consistent.";

pub const GENERIC_STYLE_TEXT: &str = r#"- Write natural, idiomatic {{language}} as a native game writer would.
- Follow standard {{language}} punctuation and typography.
- Keep the register of each line (casual, formal, rude, playful) recognizable in {{language}}.
- Keep on-screen length close to the source where possible."#;

struct LanguageProfile {
    key: &'static str,
    aliases: &'static [&'static str],
    style: &'static str,
}

const LANGUAGES: &[LanguageProfile] = &[
    LanguageProfile {
        key: "英文",
        aliases: &["English", "英语", "en"],
        style: r#"- Use natural contemporary English dialogue; contractions are fine in speech.
- Keep names of characters, places and skills in title case as listed in the terminology.
- Avoid literal calques of Chinese idioms; use an English equivalent with the same tone.
- Keep UI-like strings short and imperative."#,
    },
    LanguageProfile {
        key: "日文",
        aliases: &["Japanese", "日语", "日本語", "ja"],
        style: r#"- Choose keigo level and first-person pronoun (俺/僕/私/あたし) to fit the character.
- Use sentence-final particles that match the personality; avoid mixing polite and plain forms in one line.
- Use 「」 for quoted speech and the Japanese full-width punctuation 。、！？.
- Write foreign names in katakana unless the terminology gives another form."#,
    },
    LanguageProfile {
        key: "韩文",
        aliases: &["Korean", "韩语", "한국어", "ko"],
        style: r#"- Pick the speech level (반말/해요체/합쇼체) from the speaker's relationship and personality, and keep it consistent.
- Use natural Korean word order; do not mirror the source structure.
- Transliterate names per the terminology, otherwise with standard Hangul transcription."#,
    },
    LanguageProfile {
        key: "法文",
        aliases: &["French", "法语", "Français", "fr"],
        style: r#"- Use tu/vous according to the relationship between speakers and keep it stable.
- Apply French typography: non-breaking space before : ; ! ? and « » for quotations.
- Prefer idiomatic French over literal renderings."#,
    },
    LanguageProfile {
        key: "德文",
        aliases: &["German", "德语", "Deutsch", "de"],
        style: r#"- Use du/Sie according to the relationship between speakers and keep it stable.
- Capitalize nouns correctly and use „ " quotation marks.
- Keep compound terms from the terminology intact."#,
    },
    LanguageProfile {
        key: "西班牙文",
        aliases: &["Spanish", "西班牙语", "Español", "es"],
        style: r#"- Use tú/usted according to the relationship between speakers.
- Use opening ¡ and ¿ marks.
- Prefer neutral Spanish unless a requirement names a region."#,
    },
    LanguageProfile {
        key: "俄文",
        aliases: &["Russian", "俄语", "Русский", "ru"],
        style: r#"- Use ты/вы according to the relationship between speakers.
- Keep grammatical gender agreement correct for the speaker and addressee.
- Use « » for quotations."#,
    },
    LanguageProfile {
        key: "葡萄牙文",
        aliases: &["Portuguese", "葡萄牙语", "Português", "pt"],
        style: r#"- Default to Brazilian Portuguese unless a requirement says otherwise.
- Use você/tu consistently per character.
- Keep the register of the source line."#,
    },
    LanguageProfile {
        key: "泰文",
        aliases: &["Thai", "泰语", "ไทย", "th"],
        style: r#"- Use polite particles (ครับ/ค่ะ) only when the character would, and match the speaker's gender.
- Do not insert spaces between words inside a sentence."#,
    },
    LanguageProfile {
        key: "越南文",
        aliases: &["Vietnamese", "越南语", "Tiếng Việt", "vi"],
        style: r#"- Choose pronouns (anh/chị/em/tôi/tao/mày) from the relationship and personality of the speakers.
- Keep full diacritics."#,
    },
    LanguageProfile {
        key: "繁体中文",
        aliases: &["Traditional Chinese", "繁中", "繁體中文", "zh-TW"],
        style: r#"- Use Traditional characters and Taiwan-standard vocabulary (e.g. 軟體, 資訊, 影片).
- Use 「」 for quoted speech.
- Do not simply convert characters; adjust wording that reads unnaturally in Taiwan."#,
    },
];

fn find_profile(language: &str) -> Option<&'static LanguageProfile> {
    let language = language.trim();
    LANGUAGES.iter().find(|p| {
        p.key == language || p.aliases.iter().any(|a| a.eq_ignore_ascii_case(language))
    })
}

/// Alternate names of a configured language (e.g. `English` for `英文`).
pub fn language_aliases(language: &str) -> &'static [&'static str] {
    find_profile(language).map(|p| p.aliases).unwrap_or(&[])
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// Per-language style guidance: built-in profiles, overridable per language.
#[derive(Clone, Debug, Default)]
pub struct StyleGuide {
    overrides: BTreeMap<String, String>,
    system: Option<String>,
}

impl StyleGuide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: BTreeMap<String, String>) -> Self {
        Self {
            overrides,
            system: None,
        }
    }

    pub fn with_system_template(mut self, template: Option<String>) -> Self {
        self.system = template.filter(|t| !t.trim().is_empty());
        self
    }

    /// Style rules for `language`; unknown languages get the generic policy.
    pub fn guidance(&self, language: &str) -> String {
        let text = self
            .overrides
            .get(language)
            .map(String::as_str)
            .or_else(|| find_profile(language).map(|p| p.style))
            .unwrap_or(GENERIC_STYLE_TEXT);
        render_template(text, &[("language", language)])
    }

    pub fn system_instruction(&self, language: &str) -> String {
        let tmpl = self.system.as_deref().unwrap_or(DEFAULT_SYSTEM_TEXT);
        render_template(tmpl, &[("language", language)])
    }
}

/// Everything that goes into one prompt; built per (row, language).
#[derive(Clone, Copy, Debug)]
pub struct PromptInput<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub speaker: Option<&'a str>,
    pub personality: Option<&'a str>,
    pub terms: &'a TermMatches,
    pub context: &'a str,
    pub requirements: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub system: String,
    pub user: String,
}

/// Builds the instruction document. Section order and priority labels are part of the
/// contract with the backend:
/// speaker -> style (lowest) -> requirements (highest) -> context -> terminology -> source ->
/// output rules.
pub fn compose(style: &StyleGuide, input: &PromptInput<'_>) -> ComposedPrompt {
    let lang = input.language;
    let mut out = String::new();

    if let Some(speaker) = input.speaker.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str("## Speaker\n");
        out.push_str(&format!("This line is spoken by: {speaker}\n"));
        if let Some(p) = input.personality.map(str::trim).filter(|s| !s.is_empty()) {
            out.push_str(&format!("Personality: {p}\n"));
            out.push_str("Make the wording, tone and speech habits fit this character.\n");
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "## {lang} style rules [LOWEST PRIORITY: yield to every other section]\n"
    ));
    out.push_str(style.guidance(lang).trim());
    out.push_str("\n\n");

    let req = input.requirements.trim();
    if !req.is_empty() {
        out.push_str("## Custom requirements [HIGHEST PRIORITY: override the rules above]\n");
        out.push_str(req);
        out.push_str("\n\n");
    }

    let ctx = input.context.trim_end();
    if !ctx.is_empty() {
        out.push_str("## Previous lines (context reference only)\n");
        out.push_str(ctx);
        out.push_str("\n\n");
    }

    let terms = TerminologyIndex::render_for_prompt(input.terms);
    if !terms.is_empty() {
        out.push_str("## Terminology reference\n");
        out.push_str(&terms);
        out.push('\n');
    }

    out.push_str("## Source text\n");
    out.push_str(input.text);
    out.push_str("\n\n");

    out.push_str("## Output rules\n");
    out.push_str(&format!(
        "- Return ONLY the {lang} translation of the source text. No quotes, labels, notes or explanations.\n"
    ));
    if !terms.is_empty() {
        out.push_str(
            "- Terminology: proper nouns (character, place, item and skill names) MUST use the listed translation exactly. \
Ordinary vocabulary entries may be inflected or adapted to fit the sentence. \
Where several translations are listed, choose the one that fits the context.\n",
        );
    }
    if !ctx.is_empty() {
        out.push_str(
            "- The previous lines are for consistency of names and tone only. Do not translate or repeat them, \
and do not let them override the meaning of the source text.\n",
        );
    }

    ComposedPrompt {
        system: style.system_instruction(lang),
        user: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> TermMatches {
        let mut m = TermMatches::new();
        m.insert("班长".into(), vec!["Monitor".into()]);
        m
    }

    #[test]
    fn sections_follow_priority_order() {
        let t = terms();
        let p = compose(
            &StyleGuide::new(),
            &PromptInput {
                text: "班长来了",
                language: "英文",
                speaker: Some("艾莉"),
                personality: Some("活泼"),
                terms: &t,
                context: "1. Source: 你好\n   Translation: Hello\n",
                requirements: "Keep it under 40 characters",
            },
        );
        let order = [
            "## Speaker",
            "## 英文 style rules [LOWEST PRIORITY",
            "## Custom requirements [HIGHEST PRIORITY",
            "## Previous lines",
            "## Terminology reference",
            "## Source text\n班长来了",
            "## Output rules",
        ];
        let mut last = 0usize;
        for section in order {
            let pos = p.user.find(section).unwrap_or_else(|| panic!("missing {section}"));
            assert!(pos >= last, "{section} out of order");
            last = pos;
        }
        assert!(p.user.contains("Personality: 活泼"));
        assert!(p.user.contains("- 班长 => Monitor"));
        assert!(p.system.contains("into 英文"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let t = TermMatches::new();
        let p = compose(
            &StyleGuide::new(),
            &PromptInput {
                text: "你好",
                language: "日文",
                speaker: None,
                personality: None,
                terms: &t,
                context: "",
                requirements: "  ",
            },
        );
        assert!(!p.user.contains("## Speaker"));
        assert!(!p.user.contains("## Custom requirements"));
        assert!(!p.user.contains("## Previous lines"));
        assert!(!p.user.contains("## Terminology reference"));
        assert!(!p.user.contains("Terminology:"));
        assert!(p.user.contains("keigo"));
    }

    #[test]
    fn speaker_without_personality_still_named() {
        let t = TermMatches::new();
        let p = compose(
            &StyleGuide::new(),
            &PromptInput {
                text: "你好",
                language: "英文",
                speaker: Some("路人"),
                personality: None,
                terms: &t,
                context: "",
                requirements: "",
            },
        );
        assert!(p.user.contains("spoken by: 路人"));
        assert!(!p.user.contains("Personality:"));
    }

    #[test]
    fn unknown_language_gets_parameterized_fallback() {
        let style = StyleGuide::new();
        let g = style.guidance("Klingon");
        assert!(g.contains("idiomatic Klingon"));
        assert!(!g.contains("{{language}}"));
    }

    #[test]
    fn overrides_and_aliases() {
        let mut o = BTreeMap::new();
        o.insert("英文".to_string(), "- British spelling for {{language}}".to_string());
        let style = StyleGuide::with_overrides(o);
        assert_eq!(style.guidance("英文"), "- British spelling for 英文");
        assert!(style.guidance("japanese").contains("keigo"));
        assert!(language_aliases("英文").contains(&"English"));
        assert!(language_aliases("火星文").is_empty());
    }

    #[test]
    fn render_template_replaces_all() {
        assert_eq!(
            render_template("{{a}}-{{b}}-{{a}}", &[("a", "x"), ("b", "y")]),
            "x-y-x"
        );
    }
}
