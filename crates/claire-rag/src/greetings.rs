//! Greeting short-circuit.
//!
//! Very short messages that only say hello, thanks or goodbye are answered
//! from a canned pool instead of going through retrieval and generation.

use anyhow::{Context as AnyhowContext, Result};
use rand::Rng;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::GreetingConfig;
use crate::types::{Emotion, Language};

const LAST_RESORT_GREETING: &str =
    "Hello! I'm CLAIRE, your BPI banking assistant. How can I help you today?";

static THANKS_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(thanks?|thank you|salamat)")
        .case_insensitive(true)
        .build()
        .expect("thanks regex is valid")
});

static FAREWELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(bye|goodbye|paalam|farewell|see you)")
        .case_insensitive(true)
        .build()
        .expect("farewell regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetingKind {
    Thanks,
    Farewell,
    Greeting,
}

impl GreetingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thanks => "thanks",
            Self::Farewell => "bye",
            Self::Greeting => "greeting",
        }
    }
}

/// Picks one entry out of a response pool of `len` items.
pub trait ResponseChooser: Send + Sync {
    fn choose(&self, len: usize) -> usize;
}

/// Uniform random selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChooser;

impl ResponseChooser for RandomChooser {
    fn choose(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..len)
    }
}

/// Always picks the same index (wrapped to the pool size).
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedChooser(pub usize);

impl ResponseChooser for FixedChooser {
    fn choose(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.0 % len
        }
    }
}

/// Serialized form of one language's greeting table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GreetingTable {
    pub patterns: Vec<String>,
    /// Keyed by emotion name, plus `thanks` and `bye`.
    pub responses: HashMap<String, Vec<String>>,
}

struct CompiledTable {
    patterns: Vec<Regex>,
    responses: HashMap<String, Vec<String>>,
}

impl CompiledTable {
    fn compile(table: GreetingTable) -> Result<Self> {
        let patterns = table
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid greeting pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            responses: table.responses,
        })
    }
}

/// Patterns and response pools per language.
pub struct GreetingCatalog {
    tables: HashMap<Language, CompiledTable>,
}

impl GreetingCatalog {
    /// Load a catalog from JSON: `{"english": {"patterns": [...], "responses": {...}}, ...}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<Language, GreetingTable> =
            serde_json::from_str(json).context("Failed to parse greeting catalog")?;
        Self::from_tables(raw)
    }

    pub fn from_tables(raw: HashMap<Language, GreetingTable>) -> Result<Self> {
        let mut tables = HashMap::new();
        for (language, table) in raw {
            tables.insert(language, CompiledTable::compile(table)?);
        }
        Ok(Self { tables })
    }

    /// The CLAIRE greeting tables for English, Tagalog and Taglish.
    pub fn builtin() -> Self {
        let tables = [
            (Language::English, builtin_table(ENGLISH_PATTERNS, ENGLISH_RESPONSES)),
            (Language::Tagalog, builtin_table(TAGALOG_PATTERNS, TAGALOG_RESPONSES)),
            (Language::Taglish, builtin_table(TAGLISH_PATTERNS, TAGLISH_RESPONSES)),
        ]
        .into_iter()
        .map(|(language, table)| {
            let compiled = CompiledTable::compile(table).expect("builtin greeting regex is valid");
            (language, compiled)
        })
        .collect();
        Self { tables }
    }

    /// Table for `language`, falling back to English.
    fn table(&self, language: Language) -> Option<&CompiledTable> {
        self.tables
            .get(&language)
            .or_else(|| self.tables.get(&Language::English))
    }
}

fn builtin_table(patterns: &[&str], responses: &[(&str, &[&str])]) -> GreetingTable {
    GreetingTable {
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        responses: responses
            .iter()
            .map(|(key, pool)| (key.to_string(), pool.iter().map(|s| s.to_string()).collect()))
            .collect(),
    }
}

pub struct GreetingClassifier {
    catalog: GreetingCatalog,
    enabled: bool,
    threshold: usize,
}

impl GreetingClassifier {
    pub fn new(config: &GreetingConfig) -> Self {
        Self::with_catalog(config, GreetingCatalog::builtin())
    }

    pub fn with_catalog(config: &GreetingConfig, catalog: GreetingCatalog) -> Self {
        Self {
            catalog,
            enabled: config.enabled,
            threshold: config.short_message_threshold,
        }
    }

    /// Classify `text` as a greeting, thanks or farewell. `None` means it is a real query.
    pub fn classify(&self, text: &str, language: Language) -> Option<GreetingKind> {
        if !self.enabled {
            return None;
        }

        let text = text.trim().to_lowercase();
        if text.is_empty() || text.chars().count() > self.threshold {
            return None;
        }

        let table = self.catalog.table(language)?;
        if !table.patterns.iter().any(|re| re.is_match(&text)) {
            return None;
        }

        let kind = if THANKS_RE.is_match(&text) {
            GreetingKind::Thanks
        } else if FAREWELL_RE.is_match(&text) {
            GreetingKind::Farewell
        } else {
            GreetingKind::Greeting
        };
        Some(kind)
    }

    /// Pick a response for `kind`. Generic greetings follow the emotion, defaulting to neutral.
    pub fn respond(
        &self,
        kind: GreetingKind,
        language: Language,
        emotion: Emotion,
        chooser: &dyn ResponseChooser,
    ) -> String {
        let Some(table) = self.catalog.table(language) else {
            return LAST_RESORT_GREETING.to_string();
        };

        let pool = match kind {
            GreetingKind::Thanks => table.responses.get("thanks"),
            GreetingKind::Farewell => table.responses.get("bye"),
            GreetingKind::Greeting => table
                .responses
                .get(emotion.as_str())
                .or_else(|| table.responses.get(Emotion::Neutral.as_str())),
        };

        match pool {
            Some(pool) if !pool.is_empty() => {
                let index = chooser.choose(pool.len()).min(pool.len() - 1);
                pool[index].clone()
            }
            _ => LAST_RESORT_GREETING.to_string(),
        }
    }
}

const ENGLISH_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|greetings?)(?:\s+there)?(?:\s+claire)?[!?.]*$",
    r"^good\s+(morning|afternoon|evening|day)(?:\s+claire)?[!?.]*$",
    r"^(yo|sup|wassup|what'?s up)(?:\s+claire)?[!?.]*$",
    r"^claire[!?.]*$",
    r"^(thanks?|thank you)(?:\s+claire)?[!?.]*$",
    r"^(bye|goodbye|see you|farewell)(?:\s+claire)?[!?.]*$",
];

const TAGALOG_PATTERNS: &[&str] = &[
    r"^(hi|hello|kumusta|musta)(?:\s+claire)?[!?.]*$",
    r"^magandang?\s+(umaga|hapon|gabi|araw)(?:\s+claire)?[!?.]*$",
    r"^claire[!?.]*$",
    r"^(salamat|thank you)(?:\s+claire)?[!?.]*$",
    r"^(bye|paalam|goodbye)(?:\s+claire)?[!?.]*$",
];

const TAGLISH_PATTERNS: &[&str] = &[
    r"^(hi|hello|kumusta|musta)(?:\s+claire)?[!?.]*$",
    r"^good\s+(morning|afternoon|evening)(?:\s+po)?(?:\s+claire)?[!?.]*$",
    r"^magandang?\s+(umaga|hapon|gabi)(?:\s+claire)?[!?.]*$",
    r"^claire[!?.]*$",
    r"^(thanks?|salamat|thank you)(?:\s+claire)?[!?.]*$",
    r"^(bye|paalam|goodbye|see you)(?:\s+claire)?[!?.]*$",
];

const ENGLISH_RESPONSES: &[(&str, &[&str])] = &[
    ("neutral", &[
        "Hello! I'm CLAIRE, your BPI banking assistant. How can I help you today?",
        "Hi there! I'm CLAIRE from BPI. What can I assist you with?",
        "Good day! I'm CLAIRE, here to help with your banking needs.",
    ]),
    ("grateful", &[
        "Hello! Thank you for reaching out to BPI. I'm CLAIRE, how may I assist you?",
        "Hi! It's my pleasure to help you. What can I do for you today?",
    ]),
    ("confused", &[
        "Hello! I'm CLAIRE from BPI. I'm here to help clarify any banking questions you have.",
        "Hi there! I'm CLAIRE. Feel free to ask me anything about BPI services.",
    ]),
    ("frustrated", &[
        "Hello, I'm CLAIRE. I understand you may need immediate assistance. How can I help?",
        "Hi, I'm CLAIRE from BPI. I'm here to help resolve your concerns.",
    ]),
    ("urgent", &[
        "Hello! I'm CLAIRE. I see this may be urgent. How can I assist you right away?",
        "Hi! I'm CLAIRE, ready to help with your urgent banking needs.",
    ]),
    ("worried", &[
        "Hello, I'm CLAIRE from BPI. I'm here to help address your concerns.",
        "Hi, I'm CLAIRE. Don't worry, I'm here to assist you with your banking needs.",
    ]),
    ("thanks", &[
        "You're welcome! Is there anything else I can help you with?",
        "My pleasure! Feel free to ask if you need more assistance.",
    ]),
    ("bye", &[
        "Thank you for choosing BPI! Have a great day!",
        "Goodbye! Feel free to reach out anytime you need assistance.",
    ]),
];

const TAGALOG_RESPONSES: &[(&str, &[&str])] = &[
    ("neutral", &[
        "Kumusta! Ako si CLAIRE, ang inyong BPI banking assistant. Paano ko kayo matutulungan?",
        "Hello po! Ako si CLAIRE mula sa BPI. Ano po ang maitutulong ko?",
    ]),
    ("grateful", &[
        "Kumusta po! Salamat sa pagtawag sa BPI. Ako si CLAIRE, paano ko kayo matutulungan?",
        "Hello po! Nagagalak akong makatulong. Ano po ang kailangan ninyo?",
    ]),
    ("confused", &[
        "Kumusta! Ako si CLAIRE mula sa BPI. Nandito ako para linawin ang inyong mga tanong.",
        "Hello po! Ako si CLAIRE. Magtanong lang po kayo tungkol sa BPI services.",
    ]),
    ("frustrated", &[
        "Kumusta, ako si CLAIRE. Nauunawaan ko na kailangan ninyo ng tulong. Paano ko kayo matutulungan?",
        "Hello po, ako si CLAIRE mula sa BPI. Nandito ako para resolbahin ang inyong alalahanin.",
    ]),
    ("urgent", &[
        "Kumusta! Ako si CLAIRE. Nakikita kong urgent ito. Paano ko kayo matutulungan agad?",
        "Hello po! Ako si CLAIRE, handa na tumulong sa inyong urgent na pangangailangan.",
    ]),
    ("worried", &[
        "Kumusta, ako si CLAIRE mula sa BPI. Nandito ako para tulungan kayo sa inyong alalahanin.",
        "Hello po, ako si CLAIRE. Huwag mag-alala, tutulungan ko kayo.",
    ]),
    ("thanks", &[
        "Walang anuman po! May iba pa ba akong maitutulong?",
        "Kasiyahan ko pong makatulong! Magtanong lang po kung may kailangan pa.",
    ]),
    ("bye", &[
        "Salamat sa pagtitiwala sa BPI! Magandang araw po!",
        "Paalam po! Tumawag lang po ulit kung kailangan ninyo ng tulong.",
    ]),
];

const TAGLISH_RESPONSES: &[(&str, &[&str])] = &[
    ("neutral", &[
        "Hello po! I'm CLAIRE, your BPI banking assistant. Paano ko kayo matutulungan today?",
        "Hi! Ako si CLAIRE from BPI. What can I help you with po?",
    ]),
    ("grateful", &[
        "Hello po! Thank you sa pagtawag sa BPI. I'm CLAIRE, how can I assist you?",
        "Hi! It's my pleasure to help you po. Ano ang need niyo today?",
    ]),
    ("confused", &[
        "Hello! I'm CLAIRE from BPI. I'm here para i-clarify any questions ninyo.",
        "Hi po! Ako si CLAIRE. Feel free to ask about BPI services.",
    ]),
    ("frustrated", &[
        "Hello, I'm CLAIRE. I understand na you need immediate help. Paano ko kayo matutulungan?",
        "Hi po, ako si CLAIRE from BPI. I'm here para i-resolve ang concerns ninyo.",
    ]),
    ("urgent", &[
        "Hello! I'm CLAIRE. I see this is urgent po. How can I help you right away?",
        "Hi! Ako si CLAIRE, ready to help with your urgent needs po.",
    ]),
    ("worried", &[
        "Hello, I'm CLAIRE from BPI. I'm here para i-address ang worries ninyo.",
        "Hi po, ako si CLAIRE. Don't worry, I'll help you with your banking needs.",
    ]),
    ("thanks", &[
        "You're welcome po! May iba pa ba akong maitutulong?",
        "My pleasure po! Just ask if you need more help.",
    ]),
    ("bye", &[
        "Thank you for choosing BPI! Have a great day po!",
        "Goodbye po! Feel free to message anytime you need help.",
    ]),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> GreetingClassifier {
        GreetingClassifier::new(&GreetingConfig::default())
    }

    #[test]
    fn test_detects_greeting_kinds() {
        let c = classifier();
        assert_eq!(c.classify("Hello!", Language::English), Some(GreetingKind::Greeting));
        assert_eq!(c.classify("  Good Morning Claire ", Language::English), Some(GreetingKind::Greeting));
        assert_eq!(c.classify("thanks claire", Language::English), Some(GreetingKind::Thanks));
        assert_eq!(c.classify("see you", Language::English), Some(GreetingKind::Farewell));
        assert_eq!(c.classify("salamat", Language::Tagalog), Some(GreetingKind::Thanks));
        assert_eq!(c.classify("paalam!", Language::Taglish), Some(GreetingKind::Farewell));
        assert_eq!(c.classify("magandang umaga", Language::Tagalog), Some(GreetingKind::Greeting));
    }

    #[test]
    fn test_questions_are_not_greetings() {
        let c = classifier();
        assert_eq!(c.classify("hi, how do I reset my password?", Language::English), None);
        assert_eq!(c.classify("what is my balance", Language::English), None);
        assert_eq!(c.classify("", Language::English), None);
    }

    #[test]
    fn test_length_threshold_uses_characters() {
        let c = classifier();
        // 21 characters, otherwise a valid pattern.
        assert_eq!(c.classify("hello there claire!!!", Language::English), None);
        assert_eq!(c.classify("hello there claire!!", Language::English), Some(GreetingKind::Greeting));
    }

    #[test]
    fn test_language_specific_patterns() {
        let c = classifier();
        assert_eq!(c.classify("yo", Language::English), Some(GreetingKind::Greeting));
        assert_eq!(c.classify("yo", Language::Tagalog), None);
        assert_eq!(c.classify("good morning po", Language::Taglish), Some(GreetingKind::Greeting));
    }

    #[test]
    fn test_disabled_classifier_never_matches() {
        let config = GreetingConfig {
            enabled: false,
            ..GreetingConfig::default()
        };
        let c = GreetingClassifier::new(&config);
        assert_eq!(c.classify("hello", Language::English), None);
    }

    #[test]
    fn test_response_pools() {
        let c = classifier();
        let first = FixedChooser(0);
        assert_eq!(
            c.respond(GreetingKind::Greeting, Language::English, Emotion::Neutral, &first),
            "Hello! I'm CLAIRE, your BPI banking assistant. How can I help you today?"
        );
        assert_eq!(
            c.respond(GreetingKind::Thanks, Language::Tagalog, Emotion::Worried, &first),
            "Walang anuman po! May iba pa ba akong maitutulong?"
        );
        assert_eq!(
            c.respond(GreetingKind::Farewell, Language::Taglish, Emotion::Neutral, &FixedChooser(1)),
            "Goodbye po! Feel free to message anytime you need help."
        );
        assert!(c
            .respond(GreetingKind::Greeting, Language::English, Emotion::Urgent, &first)
            .contains("urgent"));
    }

    #[test]
    fn test_random_chooser_stays_in_pool() {
        let c = classifier();
        let pool = ENGLISH_RESPONSES
            .iter()
            .find(|(k, _)| *k == "neutral")
            .map(|(_, pool)| *pool)
            .unwrap();
        for _ in 0..20 {
            let answer = c.respond(GreetingKind::Greeting, Language::English, Emotion::Neutral, &RandomChooser);
            assert!(pool.contains(&answer.as_str()));
        }
    }

    #[test]
    fn test_json_catalog_falls_back_to_english() {
        let json = r#"{
            "english": {
                "patterns": ["^hiya$"],
                "responses": {"neutral": ["Hiya back!"]}
            }
        }"#;
        let catalog = GreetingCatalog::from_json(json).unwrap();
        let c = GreetingClassifier::with_catalog(&GreetingConfig::default(), catalog);
        assert_eq!(c.classify("HIYA", Language::Tagalog), Some(GreetingKind::Greeting));
        assert_eq!(
            c.respond(GreetingKind::Greeting, Language::Tagalog, Emotion::Confused, &FixedChooser(0)),
            "Hiya back!"
        );
        assert_eq!(
            c.respond(GreetingKind::Thanks, Language::English, Emotion::Neutral, &FixedChooser(0)),
            LAST_RESORT_GREETING
        );
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let json = r#"{"english": {"patterns": ["(unclosed"], "responses": {}}}"#;
        assert!(GreetingCatalog::from_json(json).is_err());
    }
}
