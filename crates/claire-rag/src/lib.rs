//! CLAIRE answer engine.
//!
//! Answers BPI banking questions from retrieved knowledge-base documents,
//! using a local GGUF model when it is loaded, idle and not cooling down,
//! and a retrieval-only answer otherwise.

pub mod config;
pub mod context;
pub mod gate;
pub mod generator;
pub mod greetings;
pub mod llm;
pub mod pipeline;
pub mod responses;
pub mod types;

pub use config::{ClaireConfig, DeviceProfile};
pub use gate::{GateState, GenerationGate};
pub use generator::AnswerGenerator;
pub use greetings::{GreetingCatalog, GreetingClassifier, ResponseChooser};
pub use llm::{GenerationConfig, GenerationError, LLMProvider, ProviderInfo, StopSignal};
pub use pipeline::{ChatPipeline, ChatRequest, ChatResponse, Classifier, HealthReport, Retriever};
pub use types::{
    Context, Emotion, GenerationMethod, GenerationRequest, GenerationResult, Language,
};

pub use anyhow::{Error, Result};
