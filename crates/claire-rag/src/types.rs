use serde::{Deserialize, Serialize};
use std::fmt;

/// Detected language of a customer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Tagalog,
    Taglish,
}

impl Language {
    /// Map a classifier label onto a language. Unknown labels fall back to English.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "english" | "en" => Self::English,
            "tagalog" | "filipino" | "tl" | "fil" => Self::Tagalog,
            "taglish" => Self::Taglish,
            other => {
                if !other.is_empty() {
                    tracing::debug!(label = %other, "Unrecognized language label, using english");
                }
                Self::English
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Tagalog => "tagalog",
            Self::Taglish => "taglish",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected emotion of a customer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Grateful,
    Confused,
    Frustrated,
    Urgent,
    Worried,
}

impl Emotion {
    /// Map a classifier label onto an emotion. Unknown labels fall back to neutral.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "neutral" => Self::Neutral,
            "grateful" => Self::Grateful,
            "confused" => Self::Confused,
            "frustrated" => Self::Frustrated,
            "urgent" => Self::Urgent,
            "worried" => Self::Worried,
            other => {
                if !other.is_empty() {
                    tracing::debug!(label = %other, "Unrecognized emotion label, using neutral");
                }
                Self::Neutral
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Grateful => "grateful",
            Self::Confused => "confused",
            Self::Frustrated => "frustrated",
            Self::Urgent => "urgent",
            Self::Worried => "worried",
        }
    }

    /// Emotions that get the escalation notice with the hotline number.
    pub fn needs_escalation(&self) -> bool {
        matches!(self, Self::Frustrated | Self::Urgent | Self::Worried)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved knowledge-base document handed to the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub source: Option<String>,
}

impl Context {
    pub fn new(content: impl Into<String>, title: impl Into<String>, score: f32) -> Self {
        Self {
            content: content.into(),
            title: title.into(),
            score,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One answer-generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub question: String,
    pub language: Language,
    pub emotion: Emotion,
    pub contexts: Vec<Context>,
    pub attachment: Option<String>,
}

impl GenerationRequest {
    pub fn new(question: impl Into<String>, language: Language, emotion: Emotion) -> Self {
        Self {
            question: question.into(),
            language,
            emotion,
            contexts: Vec::new(),
            attachment: None,
        }
    }

    pub fn with_contexts(mut self, contexts: Vec<Context>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Attach extracted document text. Blank text is ignored.
    pub fn with_attachment(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.attachment = if text.trim().is_empty() { None } else { Some(text) };
        self
    }

    /// The attachment, if it carries any non-whitespace text.
    pub fn attachment_text(&self) -> Option<&str> {
        self.attachment
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    GreetingResponse,
    NoContext,
    RetrievalOnlyNoModel,
    RetrievalOnlyCooldown,
    RetrievalOnlyBusy,
    ClaireRag,
    RetrievalOnly,
    Error,
}

impl GenerationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreetingResponse => "greeting_response",
            Self::NoContext => "no_context",
            Self::RetrievalOnlyNoModel => "retrieval_only_no_model",
            Self::RetrievalOnlyCooldown => "retrieval_only_cooldown",
            Self::RetrievalOnlyBusy => "retrieval_only_busy",
            Self::ClaireRag => "claire_rag",
            Self::RetrievalOnly => "retrieval_only",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for GenerationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub answer: String,
    pub success: bool,
    pub method: GenerationMethod,
    /// Wall-clock seconds spent inside the generator.
    pub generation_time: f64,
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_labels() {
        assert_eq!(Language::from_label("Tagalog"), Language::Tagalog);
        assert_eq!(Language::from_label(" taglish "), Language::Taglish);
        assert_eq!(Language::from_label("klingon"), Language::English);
        assert_eq!(Language::from_label(""), Language::English);
    }

    #[test]
    fn test_emotion_labels() {
        assert_eq!(Emotion::from_label("WORRIED"), Emotion::Worried);
        assert_eq!(Emotion::from_label("ecstatic"), Emotion::Neutral);
        assert!(Emotion::Urgent.needs_escalation());
        assert!(!Emotion::Grateful.needs_escalation());
    }

    #[test]
    fn test_method_serializes_as_tag() {
        let json = serde_json::to_string(&GenerationMethod::RetrievalOnlyNoModel).unwrap();
        assert_eq!(json, "\"retrieval_only_no_model\"");
        assert_eq!(GenerationMethod::ClaireRag.as_str(), "claire_rag");
    }

    #[test]
    fn test_blank_attachment_is_dropped() {
        let req = GenerationRequest::new("q", Language::English, Emotion::Neutral)
            .with_attachment("   \n");
        assert!(req.attachment.is_none());
        assert!(req.attachment_text().is_none());
    }
}
