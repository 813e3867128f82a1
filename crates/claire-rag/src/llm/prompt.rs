//! Alpaca-format prompt the CLAIRE model was fine-tuned on, and cleanup of
//! whatever the model leaks back from it.

use std::sync::LazyLock;

use crate::types::{Emotion, Language};

pub const INSTRUCTION_MARKER: &str = "### Instruction:";
pub const INPUT_MARKER: &str = "### Input:";
pub const OUTPUT_MARKER: &str = "### Output:";

/// Stop list passed to the model so it cannot open another template section.
pub const STOP_SEQUENCES: &[&str] = &[
    INSTRUCTION_MARKER,
    INPUT_MARKER,
    OUTPUT_MARKER,
    "\n\n### ",
    "</s>",
];

const ARTIFACTS: &[&str] = &[
    INSTRUCTION_MARKER,
    INPUT_MARKER,
    OUTPUT_MARKER,
    "###",
    "</s>",
    "<s>",
    "<|endoftext|>",
];

const INSTRUCTION: &str = "You are CLAIRE (Conversational Language AI for Resolution & Engagement), \
a banking customer assistant working for BPI (Bank of the Philippine Islands). \
Your role is to answer customer questions accurately, clearly, and empathetically. \
Given the question, its identified language and emotion, and four context documents, \
generate a response that is linguistically accurate, emotionally appropriate, \
and grounded in the most relevant context.";

static CONTEXT_HEADER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^Context\s+\d+").expect("context header regex is valid")
});

/// Build the full generation prompt. `contexts_block` comes from
/// [`crate::context::format_prompt_contexts`].
pub fn build_prompt(
    question: &str,
    language: Language,
    emotion: Emotion,
    contexts_block: &str,
) -> String {
    format!(
        "{INSTRUCTION_MARKER}\n{INSTRUCTION}\n\n\
         {INPUT_MARKER}\n\
         Question: {question}\n\
         Language: {language}\n\
         Emotion: {emotion}\n\n\
         Contexts:\n{contexts_block}\n\n\
         {OUTPUT_MARKER}\n"
    )
}

/// Strip template markers and special tokens, drop leaked context headers,
/// and keep the remaining non-empty lines.
pub fn clean_generated_text(raw: &str) -> String {
    let mut text = raw.to_string();
    for artifact in ARTIFACTS {
        text = text.replace(artifact, "");
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !(CONTEXT_HEADER_RE.is_match(line) && line.contains("(Score:")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_sections_in_order() {
        let prompt = build_prompt(
            "How do I open an account?",
            Language::English,
            Emotion::Confused,
            "Context 1 (Score: 0.90): Visit any branch.",
        );
        let instruction = prompt.find(INSTRUCTION_MARKER).unwrap();
        let input = prompt.find(INPUT_MARKER).unwrap();
        let output = prompt.find(OUTPUT_MARKER).unwrap();
        assert!(instruction < input && input < output);
        assert!(prompt.contains("Question: How do I open an account?"));
        assert!(prompt.contains("Language: english"));
        assert!(prompt.contains("Emotion: confused"));
        assert!(prompt.contains("Contexts:\nContext 1 (Score: 0.90): Visit any branch."));
        assert!(prompt.ends_with("### Output:\n"));
    }

    #[test]
    fn test_clean_removes_markers_and_leaked_contexts() {
        let raw = "### Output:\nYou can reset it online.\nContext 2 (Score: 0.50): leaked\n\n  Call us anytime. </s>";
        let cleaned = clean_generated_text(raw);
        assert_eq!(cleaned, "You can reset it online.\nCall us anytime.");
        assert!(!cleaned.contains("### Output:"));
        assert!(!cleaned.contains("Context 2 (Score: 0.50): leaked"));
    }

    #[test]
    fn test_clean_keeps_context_word_in_prose() {
        let raw = "Context matters here.\nContext 3 without a score line";
        let cleaned = clean_generated_text(raw);
        assert_eq!(cleaned, "Context matters here.\nContext 3 without a score line");
    }

    #[test]
    fn test_clean_strips_special_tokens() {
        let raw = "<s>Hello po!<|endoftext|>\n###";
        assert_eq!(clean_generated_text(raw), "Hello po!");
    }

    #[test]
    fn test_clean_only_artifacts_is_empty() {
        assert!(clean_generated_text("### Instruction:\n### Input:\n</s>").is_empty());
    }
}
