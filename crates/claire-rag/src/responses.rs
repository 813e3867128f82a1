//! Canned text appended to or substituted for answers.

use std::panic::{self, AssertUnwindSafe};

use crate::context::format_retrieval_answer;
use crate::types::{Context, Emotion, Language};

pub const SUPPORT_HOTLINE: &str = "889-10000";

const CONTACT_SUFFIX: &str =
    "📞 Please contact our customer service at 889-10000 for personalized assistance.";

/// Closing line matching the customer's emotion. Neutral gets none.
pub fn emotion_suffix(language: Language, emotion: Emotion) -> Option<&'static str> {
    let suffix = match (emotion, language) {
        (Emotion::Frustrated | Emotion::Urgent | Emotion::Worried, Language::Tagalog) => {
            "🆘 Nauunawaan namin ang inyong sitwasyon. Para sa agarang tulong, tumawag sa 889-10000."
        }
        (Emotion::Frustrated | Emotion::Urgent | Emotion::Worried, Language::Taglish) => {
            "🆘 We understand your situation. For immediate help, please call 889-10000."
        }
        (Emotion::Frustrated | Emotion::Urgent | Emotion::Worried, Language::English) => {
            "🆘 We understand your concern. For immediate assistance, please call 889-10000."
        }
        (Emotion::Grateful, Language::Tagalog) => "😊 Salamat sa inyong tiwala sa BPI!",
        (Emotion::Grateful, Language::Taglish) => "😊 Thank you for trusting BPI!",
        (Emotion::Grateful, Language::English) => "😊 Thank you for choosing BPI!",
        (Emotion::Confused, Language::Tagalog) => {
            "💡 Kung may iba pang tanong, huwag mag-atubiling magtanong."
        }
        (Emotion::Confused, Language::Taglish) => "💡 If you have more questions, feel free to ask.",
        (Emotion::Confused, Language::English) => {
            "💡 If you need further clarification, please don't hesitate to ask."
        }
        (Emotion::Neutral, _) => return None,
    };
    Some(suffix)
}

pub fn with_emotion_suffix(answer: String, language: Language, emotion: Emotion) -> String {
    match emotion_suffix(language, emotion) {
        Some(suffix) => format!("{}\n\n{}", answer, suffix),
        None => answer,
    }
}

pub fn timeout_note(language: Language) -> &'static str {
    match language {
        Language::Tagalog => {
            "⏱️ Paalala: Direktang galing sa knowledge base ang sagot dahil nag-timeout ang AI generation."
        }
        Language::Taglish => {
            "⏱️ Note: This is directly from our knowledge base since AI generation timed out."
        }
        Language::English => {
            "⏱️ Note: This response is directly from our knowledge base as AI generation exceeded time limit."
        }
    }
}

pub fn with_timeout_note(answer: String, language: Language) -> String {
    format!("{}\n\n{}", answer, timeout_note(language))
}

/// Answer when retrieval found nothing and no document was attached.
pub fn no_context_response(language: Language) -> String {
    let apology = match language {
        Language::Tagalog => {
            "Pasensya na, wala akong nakitang tugmang impormasyon para sa inyong tanong."
        }
        Language::Taglish => "Sorry, I couldn't find matching information for your question.",
        Language::English => {
            "I apologize, but I couldn't find relevant information for your question."
        }
    };
    format!("{}\n\n{}", apology, CONTACT_SUFFIX)
}

pub fn error_response(language: Language) -> &'static str {
    match language {
        Language::Tagalog => "⚠️ Pasensya, may technical error. Tumawag sa 889-10000 para sa tulong.",
        Language::Taglish | Language::English => {
            "⚠️ Sorry, a technical error occurred. Please call 889-10000 for assistance."
        }
    }
}

/// Shown when a retrieval-only answer could not be formatted.
pub fn retrieval_apology(language: Language) -> &'static str {
    match language {
        Language::Tagalog => {
            "Paumanhin po, nagkaroon ng error sa pagproseso ng inyong tanong. Pakisubukang muli."
        }
        Language::Taglish | Language::English => {
            "I apologize, but I encountered an error processing your request. Please try again."
        }
    }
}

/// Contact referral used when an answer is too short to be useful.
pub fn fallback_answer(language: Language) -> &'static str {
    match language {
        Language::Tagalog => {
            "Salamat sa inyong tanong. Para sa detalyadong tulong, tumawag sa 889-10000."
        }
        Language::Taglish => {
            "Thank you sa iyong question. For detailed help, please call 889-10000."
        }
        Language::English => {
            "Thank you for your question. For detailed assistance, please call 889-10000."
        }
    }
}

/// Replace answers shorter than `min_chars` (after trimming) with the contact referral.
pub fn ensure_answer(answer: String, language: Language, min_chars: usize) -> String {
    if answer.trim().chars().count() < min_chars {
        tracing::warn!(chars = answer.trim().chars().count(), "Answer too short, using fallback");
        fallback_answer(language).to_string()
    } else {
        answer
    }
}

/// Retrieval-only answer with the emotion suffix. Never panics; a failure
/// while formatting yields an apology in the customer's language.
pub fn retrieval_answer(
    language: Language,
    emotion: Emotion,
    contexts: &[Context],
    attachment: Option<&str>,
) -> String {
    guarded_format(language, || {
        let body = format_retrieval_answer(language, contexts, attachment);
        with_emotion_suffix(body, language, emotion)
    })
}

fn guarded_format(language: Language, format: impl FnOnce() -> String) -> String {
    match panic::catch_unwind(AssertUnwindSafe(format)) {
        Ok(answer) => answer,
        Err(_) => {
            tracing::error!(language = ?language, "Formatting retrieved contexts failed");
            retrieval_apology(language).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worried_retrieval_answer_escalates() {
        let contexts = vec![Context::new(
            "Visit bpi.com and click Forgot Password...",
            "Password Reset",
            0.9,
        )];
        let answer = retrieval_answer(Language::English, Emotion::Worried, &contexts, None);
        assert!(answer.starts_with("Based on our information:"));
        assert!(answer.ends_with(
            "🆘 We understand your concern. For immediate assistance, please call 889-10000."
        ));
    }

    #[test]
    fn test_formatting_failure_apologizes_in_language() {
        let answer = guarded_format(Language::Tagalog, || panic!("bad context"));
        assert_eq!(answer, retrieval_apology(Language::Tagalog));
        assert!(answer.starts_with("Paumanhin po"));

        let answer = guarded_format(Language::Taglish, || panic!("bad context"));
        assert!(answer.starts_with("I apologize"));
    }

    #[test]
    fn test_suffix_per_emotion() {
        assert!(emotion_suffix(Language::English, Emotion::Neutral).is_none());
        assert_eq!(
            emotion_suffix(Language::Tagalog, Emotion::Grateful),
            Some("😊 Salamat sa inyong tiwala sa BPI!")
        );
        assert!(emotion_suffix(Language::Taglish, Emotion::Confused)
            .unwrap()
            .starts_with("💡"));
        for emotion in [Emotion::Frustrated, Emotion::Urgent, Emotion::Worried] {
            for language in [Language::English, Language::Tagalog, Language::Taglish] {
                assert!(emotion_suffix(language, emotion).unwrap().contains(SUPPORT_HOTLINE));
            }
        }
    }

    #[test]
    fn test_neutral_answer_unchanged() {
        let answer = with_emotion_suffix("Hello".to_string(), Language::English, Emotion::Neutral);
        assert_eq!(answer, "Hello");
    }

    #[test]
    fn test_no_context_contains_hotline() {
        for language in [Language::English, Language::Tagalog, Language::Taglish] {
            assert!(no_context_response(language).contains(SUPPORT_HOTLINE));
        }
        assert!(no_context_response(Language::Tagalog).starts_with("Pasensya na"));
    }

    #[test]
    fn test_error_response_language_family() {
        assert!(error_response(Language::Tagalog).contains("Pasensya"));
        assert_eq!(error_response(Language::Taglish), error_response(Language::English));
    }

    #[test]
    fn test_timeout_note_appended() {
        let answer = with_timeout_note("Body".to_string(), Language::Taglish);
        assert!(answer.starts_with("Body\n\n⏱️ Note:"));
    }

    #[test]
    fn test_short_answers_replaced() {
        assert_eq!(
            ensure_answer("  ok ".to_string(), Language::English, 10),
            fallback_answer(Language::English)
        );
        let long = "You may visit any branch.".to_string();
        assert_eq!(ensure_answer(long.clone(), Language::English, 10), long);
    }
}
