//! Answer a single question against a JSON file of retrieved contexts.
//!
//!   claire --question "How do I reset my password?" --contexts contexts.json --emotion worried

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use std::path::PathBuf;

use claire_rag::{AnswerGenerator, ClaireConfig, Context, Emotion, GenerationRequest, Language};

#[derive(Parser, Debug)]
#[command(name = "claire")]
#[command(about = "Generate a CLAIRE answer from retrieved contexts")]
struct Args {
    /// Customer question
    #[arg(short, long)]
    question: String,

    /// Detected language: english, tagalog or taglish
    #[arg(short, long, default_value = "english")]
    language: String,

    /// Detected emotion: neutral, grateful, confused, frustrated, urgent or worried
    #[arg(short, long, default_value = "neutral")]
    emotion: String,

    /// JSON array of {content, title, score, source}
    #[arg(short, long)]
    contexts: Option<PathBuf>,

    /// Text file extracted from an uploaded document
    #[arg(short, long)]
    attachment: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, env = "CLAIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Answer retrieval-only without loading the model
    #[arg(long)]
    no_model: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClaireConfig::from_file(path).map_err(anyhow::Error::msg)?,
        None => ClaireConfig::default(),
    };
    config.apply_env();
    if args.no_model {
        config.model.skip_loading = true;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let contexts: Vec<Context> = match &args.contexts {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read contexts from {}", path.display()))?;
            serde_json::from_str(&raw).context("Contexts file must be a JSON array of documents")?
        }
        None => Vec::new(),
    };

    let mut request = GenerationRequest::new(
        args.question,
        Language::from_label(&args.language),
        Emotion::from_label(&args.emotion),
    )
    .with_contexts(contexts);
    if let Some(path) = &args.attachment {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        request = request.with_attachment(text);
    }

    let generator = tokio::task::spawn_blocking(move || AnswerGenerator::load(config))
        .await
        .context("Model loading task failed")?;

    let result = generator.generate_answer(&request).await;
    generator.shutdown();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
