use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Narration target language. Drives symbol words, letter names and the
/// pronunciation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en", alias = "english")]
    English,
    #[serde(rename = "hi", alias = "hindi", alias = "hinglish")]
    Hindi,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
        }
    }

    /// Generic stock query used when a scene yields nothing searchable.
    pub fn fallback_query(self) -> &'static str {
        match self {
            Language::English => "city lifestyle",
            Language::Hindi => "india lifestyle",
        }
    }

    fn symbol_words(self) -> &'static [(char, &'static str)] {
        match self {
            Language::English => &[
                ('%', " percent "),
                ('&', " and "),
                ('/', " or "),
                ('@', " at "),
                ('+', " plus "),
            ],
            Language::Hindi => &[
                ('%', " प्रतिशत "),
                ('&', " और "),
                ('/', " "),
                ('@', " "),
                ('+', " प्लस "),
            ],
        }
    }

    fn letter_name(self, letter: char) -> String {
        match self {
            Language::English => letter.to_string(),
            Language::Hindi => HINDI_LETTERS
                .iter()
                .find(|(l, _)| *l == letter)
                .map(|(_, name)| (*name).to_string())
                .unwrap_or_else(|| letter.to_string()),
        }
    }
}

const HINDI_LETTERS: &[(char, &str)] = &[
    ('A', "ए"),
    ('B', "बी"),
    ('C', "सी"),
    ('D', "डी"),
    ('E', "ई"),
    ('F', "एफ"),
    ('G', "जी"),
    ('H', "एच"),
    ('I', "आई"),
    ('J', "जे"),
    ('K', "के"),
    ('L', "एल"),
    ('M', "एम"),
    ('N', "एन"),
    ('O', "ओ"),
    ('P', "पी"),
    ('Q', "क्यू"),
    ('R', "आर"),
    ('S', "एस"),
    ('T', "टी"),
    ('U', "यू"),
    ('V', "वी"),
    ('W', "डब्ल्यू"),
    ('X', "एक्स"),
    ('Y', "वाई"),
    ('Z', "ज़ेड"),
];

const ENGLISH_PRONUNCIATION: &[(&str, &str)] = &[
    ("gif", "jif"),
    ("sql", "sequel"),
    ("gui", "gooey"),
    ("nginx", "engine x"),
    ("saas", "sass"),
    ("kubernetes", "koo-ber-net-eez"),
    ("cache", "cash"),
];

const HINDI_PRONUNCIATION: &[(&str, &str)] = &[
    ("practical", "प्रैक्टिकल"),
    ("tech", "टेक"),
    ("update", "अपडेट"),
    ("online", "ऑनलाइन"),
    ("mobile", "मोबाइल"),
    ("phone", "फ़ोन"),
    ("office", "ऑफिस"),
    ("business", "बिज़नेस"),
    ("scam", "स्कैम"),
    ("smart", "स्मार्ट"),
];

fn stage_direction_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| {
        Regex::new(r"\[[^\]]*\]|\{[^}]*\}|\([^)]*\)").context("failed to compile stage direction regex")
    })
}

fn noise_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"[\[\]{}();|*_~]").context("failed to compile noise regex"))
}

fn acronym_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"\b[A-Z]{2,6}\b").context("failed to compile acronym regex"))
}

fn whitespace_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"\s+").context("failed to compile whitespace regex"))
}

fn word_regex(word: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
        .with_context(|| format!("failed to compile pronunciation pattern for {word:?}"))
}

type PronunciationTable = Vec<(Regex, &'static str)>;

fn builtin_table(language: Language) -> Result<&'static PronunciationTable> {
    static EN: OnceCell<PronunciationTable> = OnceCell::new();
    static HI: OnceCell<PronunciationTable> = OnceCell::new();

    let (cell, source) = match language {
        Language::English => (&EN, ENGLISH_PRONUNCIATION),
        Language::Hindi => (&HI, HINDI_PRONUNCIATION),
    };
    cell.get_or_try_init(|| {
        source
            .iter()
            .map(|(word, spoken)| Ok((word_regex(word)?, *spoken)))
            .collect()
    })
}

/// Canonical spoken form of a scene's text. Both the cache key and every
/// provider call use this output, never the raw text.
pub fn normalize_narration(
    text: &str,
    language: Language,
    overrides: &BTreeMap<String, String>,
) -> Result<String> {
    let mut t = text.replace(['\n', '\r'], " ");
    t = stage_direction_regex()?.replace_all(&t, " ").into_owned();
    t = noise_regex()?.replace_all(&t, " ").into_owned();

    for (symbol, spoken) in language.symbol_words() {
        if t.contains(*symbol) {
            t = t.replace(*symbol, spoken);
        }
    }

    // jargon first so table entries win over letter-by-letter spelling
    for (pattern, spoken) in builtin_table(language)? {
        t = pattern.replace_all(&t, *spoken).into_owned();
    }
    for (word, spoken) in overrides {
        if word.trim().is_empty() {
            continue;
        }
        t = word_regex(word.trim())?
            .replace_all(&t, spoken.as_str())
            .into_owned();
    }

    t = acronym_regex()?
        .replace_all(&t, |caps: &Captures| spell_letters(&caps[0], language))
        .into_owned();

    Ok(whitespace_regex()?.replace_all(&t, " ").trim().to_string())
}

fn spell_letters(acronym: &str, language: Language) -> String {
    acronym
        .chars()
        .map(|c| language.letter_name(c))
        .collect::<Vec<_>>()
        .join("-")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
