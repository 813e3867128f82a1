//! Request-level chat flow.
//!
//! Language and emotion detection and knowledge-base retrieval run
//! concurrently. Each collaborator failure degrades to a default, so a
//! question always gets an answer.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::truncate_chars;
use crate::gate::GateState;
use crate::generator::AnswerGenerator;
use crate::responses;
use crate::types::{Context, Emotion, GenerationMethod, GenerationRequest, Language};

/// Retrieved documents handed to the generator alongside an attachment.
const GENERATOR_DOCUMENTS: usize = 3;
const UPLOADED_DOCUMENT_TITLE: &str = "Uploaded Document";
const DEGRADED_CONFIDENCE: f32 = 0.5;
const TECHNICAL_DIFFICULTIES: &str = "I apologize, but I'm experiencing technical difficulties. \
Please try again or contact customer service at 889-10000.";

/// A text classifier's best label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Language or emotion model.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<Prediction>;

    fn is_loaded(&self) -> bool {
        true
    }
}

/// Knowledge-base similarity search.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Context>>;

    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection<T> {
    pub label: T,
    pub confidence: f32,
    /// The classifier was unsure or failed, and `label` is the default.
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Text extracted from an uploaded file.
    #[serde(default)]
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub request_id: Uuid,
    pub session_id: Option<String>,
    pub answer: String,
    pub language: Detection<Language>,
    pub emotion: Detection<Emotion>,
    pub contexts: Vec<Context>,
    pub processing_time: f64,
    pub has_attachment: bool,
    pub method: GenerationMethod,
    pub timed_out: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Classifiers and retrieval work but answers are retrieval-only.
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsLoaded {
    pub language_model: bool,
    pub emotion_model: bool,
    pub answer_generator: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub models_loaded: ModelsLoaded,
    pub vector_db_ready: bool,
    pub generation_state: GateState,
    pub timestamp: DateTime<Utc>,
}

pub struct ChatPipeline {
    language: Arc<dyn Classifier>,
    emotion: Arc<dyn Classifier>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<AnswerGenerator>,
    config: PipelineConfig,
}

impl ChatPipeline {
    pub fn new(
        language: Arc<dyn Classifier>,
        emotion: Arc<dyn Classifier>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<AnswerGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            language,
            emotion,
            retriever,
            generator,
            config,
        }
    }

    pub fn generator(&self) -> &Arc<AnswerGenerator> {
        &self.generator
    }

    /// Answer one chat request. Never fails.
    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let session_id = request.session_id.clone();

        match AssertUnwindSafe(self.process(request_id, request, start)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(request_id = %request_id, "Chat pipeline critical error");
                ChatResponse {
                    request_id,
                    session_id,
                    answer: TECHNICAL_DIFFICULTIES.to_string(),
                    language: Detection {
                        label: Language::default(),
                        confidence: 0.0,
                        low_confidence: true,
                    },
                    emotion: Detection {
                        label: Emotion::default(),
                        confidence: 0.0,
                        low_confidence: true,
                    },
                    contexts: Vec::new(),
                    processing_time: start.elapsed().as_secs_f64(),
                    has_attachment: false,
                    method: GenerationMethod::Error,
                    timed_out: false,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn process(&self, request_id: Uuid, request: ChatRequest, start: Instant) -> ChatResponse {
        let attachment = request
            .extracted_text
            .as_deref()
            .filter(|text| !text.trim().is_empty());

        let search_query = match attachment {
            Some(text) => {
                tracing::info!(chars = text.chars().count(), "Processing with attachment");
                format!(
                    "{}\n\n[Document Content]:\n{}",
                    request.question,
                    truncate_chars(text, self.config.max_attachment_chars)
                )
            }
            None => request.question.clone(),
        };

        let threshold = self.config.confidence_threshold;
        let (language, emotion, documents) = tokio::join!(
            detect(self.language.as_ref(), &request.question, threshold, "language", Language::from_label),
            detect(self.emotion.as_ref(), &request.question, threshold, "emotion", Emotion::from_label),
            self.retrieve(&search_query),
        );

        let contexts: Vec<Context> = documents
            .iter()
            .map(|doc| Context {
                content: truncate_chars(&doc.content, self.config.max_context_chars),
                ..doc.clone()
            })
            .collect();

        let mut generator_contexts = Vec::with_capacity(GENERATOR_DOCUMENTS + 1);
        if let Some(text) = attachment {
            generator_contexts.push(Context::new(
                truncate_chars(text, self.config.max_context_chars),
                UPLOADED_DOCUMENT_TITLE,
                1.0,
            ));
        }
        generator_contexts.extend(documents.into_iter().take(GENERATOR_DOCUMENTS));

        let mut generation = GenerationRequest::new(&request.question, language.label, emotion.label)
            .with_contexts(generator_contexts);
        if let Some(text) = attachment {
            generation = generation.with_attachment(text);
        }

        let result = self.generator.generate_answer(&generation).await;
        let answer = responses::ensure_answer(result.answer, language.label, self.config.min_answer_chars);

        let processing_time = start.elapsed().as_secs_f64();
        tracing::info!(
            request_id = %request_id,
            language = %language.label,
            emotion = %emotion.label,
            method = %result.method,
            contexts = contexts.len(),
            processing_secs = format!("{:.2}", processing_time),
            "Chat request answered"
        );

        ChatResponse {
            request_id,
            session_id: request.session_id,
            answer,
            language,
            emotion,
            contexts,
            processing_time,
            has_attachment: attachment.is_some(),
            method: result.method,
            timed_out: result.timed_out,
            timestamp: Utc::now(),
        }
    }

    async fn retrieve(&self, query: &str) -> Vec<Context> {
        match self.retriever.search(query, self.config.top_k).await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(error = %e, "Knowledge retrieval failed, continuing without contexts");
                Vec::new()
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        let models_loaded = ModelsLoaded {
            language_model: self.language.is_loaded(),
            emotion_model: self.emotion.is_loaded(),
            answer_generator: self.generator.has_model(),
        };
        let vector_db_ready = self.retriever.is_ready();

        let classifiers_ready = models_loaded.language_model && models_loaded.emotion_model;
        let status = if classifiers_ready && vector_db_ready && models_loaded.answer_generator {
            HealthStatus::Healthy
        } else if classifiers_ready && vector_db_ready {
            tracing::warn!("Answer generator not loaded, using retrieval-only mode");
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            models_loaded,
            vector_db_ready,
            generation_state: self.generator.gate_state(),
            timestamp: Utc::now(),
        }
    }
}

/// Run a classifier, replacing unsure or failed predictions with the default label.
async fn detect<T: Default>(
    classifier: &dyn Classifier,
    text: &str,
    threshold: f32,
    kind: &'static str,
    parse: fn(&str) -> T,
) -> Detection<T> {
    match classifier.predict(text).await {
        Ok(prediction) if prediction.confidence >= threshold => Detection {
            label: parse(&prediction.label),
            confidence: prediction.confidence,
            low_confidence: false,
        },
        Ok(prediction) => {
            tracing::warn!(kind, confidence = prediction.confidence, "Low classifier confidence, using default");
            Detection {
                label: T::default(),
                confidence: DEGRADED_CONFIDENCE,
                low_confidence: true,
            }
        }
        Err(e) => {
            tracing::error!(kind, error = %e, "Classifier failed, using default");
            Detection {
                label: T::default(),
                confidence: 0.0,
                low_confidence: true,
            }
        }
    }
}
