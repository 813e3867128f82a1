//! Context formatting.
//!
//! Two renderings of the same retrieved documents: the fixed-shape block the
//! model was trained on, and a plain retrieval-only answer for when the
//! model is not used.

use crate::types::{Context, Language};

/// Number of context slots in the training prompt.
pub const PROMPT_CONTEXT_SLOTS: usize = 4;
pub const PROMPT_CONTENT_CHARS: usize = 500;
pub const PROMPT_ATTACHMENT_CHARS: usize = 500;

const PLACEHOLDER: &str = "No additional context available.";
const NO_INFORMATION: &str = "No information available.";

/// Second context is only appended to a retrieval answer above this score.
const SECONDARY_SCORE_THRESHOLD: f32 = 0.8;
const SECONDARY_CHARS: usize = 300;
const ATTACHMENT_ANSWER_CHARS: usize = 300;
const KNOWLEDGE_WITH_ATTACHMENT_CHARS: usize = 400;
const KNOWLEDGE_ANSWER_CHARS: usize = 700;

/// First `max` characters of `text`, on char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Render exactly four `Context N (Score: x.xx): ...` entries, padding with
/// placeholders. An attachment is prepended as a `User Document` block.
pub fn format_prompt_contexts(contexts: &[Context], attachment: Option<&str>) -> String {
    let mut entries: Vec<String> = contexts
        .iter()
        .take(PROMPT_CONTEXT_SLOTS)
        .enumerate()
        .map(|(i, ctx)| {
            format!(
                "Context {} (Score: {:.2}): {}",
                i + 1,
                ctx.score,
                truncate_chars(&ctx.content, PROMPT_CONTENT_CHARS)
            )
        })
        .collect();

    while entries.len() < PROMPT_CONTEXT_SLOTS {
        entries.push(format!("Context {} (Score: 0.00): {}", entries.len() + 1, PLACEHOLDER));
    }

    let block = entries.join("\n\n");
    match attachment.filter(|text| !text.trim().is_empty()) {
        Some(text) => format!(
            "User Document: {}\n\n{}",
            truncate_chars(text, PROMPT_ATTACHMENT_CHARS),
            block
        ),
        None => block,
    }
}

fn lead_in(language: Language) -> &'static str {
    match language {
        Language::Tagalog => "Batay sa aming impormasyon:",
        Language::Taglish => "Based sa our information:",
        Language::English => "Based on our information:",
    }
}

/// Build a direct answer from the retrieved documents, without emotion or
/// timeout notices (those are added by [`crate::responses`]).
pub fn format_retrieval_answer(
    language: Language,
    contexts: &[Context],
    attachment: Option<&str>,
) -> String {
    let mut best = contexts
        .first()
        .map(|ctx| ctx.content.clone())
        .unwrap_or_default();

    if let Some(second) = contexts.get(1).filter(|ctx| ctx.score > SECONDARY_SCORE_THRESHOLD) {
        best = format!("{}\n\n{}", best, truncate_chars(&second.content, SECONDARY_CHARS));
    }

    let body = match attachment.filter(|text| !text.trim().is_empty()) {
        Some(text) => format!(
            "From your document:\n{}\n\nFrom our knowledge base:\n{}",
            truncate_chars(text, ATTACHMENT_ANSWER_CHARS),
            truncate_chars(&best, KNOWLEDGE_WITH_ATTACHMENT_CHARS)
        ),
        None if best.is_empty() => NO_INFORMATION.to_string(),
        None => truncate_chars(&best, KNOWLEDGE_ANSWER_CHARS),
    };

    format!("{}\n\n{}", lead_in(language), body)
}
