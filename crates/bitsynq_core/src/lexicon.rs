use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const BUILTIN_LEXICON: &str = include_str!("../lexicon/lexicon.yaml");

static BUILTIN: Lazy<Lexicon> = Lazy::new(|| {
    Lexicon::from_yaml_str(BUILTIN_LEXICON).expect("embedded lexicon.yaml must be valid")
});

/// Characters that may follow a surname inside a CJK name mention.
const NAME_CHARS: &str = r"a-zA-Z\x{4e00}-\x{9fff}";

#[derive(Debug, Clone)]
pub struct Lexicon {
    header_keywords: HashSet<String>,
    stopwords: HashSet<String>,
    keywords: Vec<KeywordRule>,
    surname_mention: Regex,
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub category: String,
    pub weight: u32,
    pub pattern: Regex,
}

#[derive(Debug, Clone, Deserialize)]
struct LexiconFile {
    header_keywords: Vec<String>,
    stopwords: Vec<String>,
    surnames: Vec<String>,
    keywords: Vec<KeywordEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeywordEntry {
    category: String,
    weight: u32,
    pattern: String,
}

impl Lexicon {
    /// The lexicon compiled into the binary, parsed once per process.
    pub fn builtin() -> &'static Lexicon {
        &BUILTIN
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: LexiconFile =
            serde_yaml::from_str(raw).map_err(|err| Error::Lexicon(err.to_string()))?;

        let keywords = file
            .keywords
            .into_iter()
            .map(|entry| {
                let pattern = RegexBuilder::new(&entry.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        Error::Lexicon(format!("keyword category {}: {err}", entry.category))
                    })?;
                Ok(KeywordRule {
                    category: entry.category,
                    weight: entry.weight,
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            header_keywords: lowercase_set(file.header_keywords),
            stopwords: lowercase_set(file.stopwords),
            keywords,
            surname_mention: build_surname_pattern(&file.surnames)?,
        })
    }

    pub fn is_header_keyword(&self, text: &str) -> bool {
        self.header_keywords.contains(&text.to_lowercase())
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(&word.to_lowercase())
    }

    pub fn keywords(&self) -> &[KeywordRule] {
        &self.keywords
    }

    /// Matches a surname plus 1-3 name characters; group 1 is the name.
    pub fn surname_mention(&self) -> &Regex {
        &self.surname_mention
    }
}

fn lowercase_set(values: Vec<String>) -> HashSet<String> {
    values.into_iter().map(|value| value.to_lowercase()).collect()
}

fn build_surname_pattern(surnames: &[String]) -> Result<Regex> {
    if surnames.is_empty() {
        return Err(Error::Lexicon("surname list is empty".to_string()));
    }
    let alternatives = surnames
        .iter()
        .map(|surname| regex::escape(surname.trim()))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r"(?:^|[^{NAME_CHARS}])((?:{alternatives})[{NAME_CHARS}]{{1,3}})(?:[^{NAME_CHARS}]|$)"
    );
    Regex::new(&pattern).map_err(|err| Error::Lexicon(format!("surname pattern: {err}")))
}
