//! LLM module - local GGUF generation behind a provider trait.
//!
//! The answer generator only talks to [`LLMProvider`]; the llama.cpp
//! provider is the production implementation and tests plug in mocks.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub mod bounded;
pub mod llamacpp_provider;
pub mod prompt;

pub use bounded::BoundedGenerator;
pub use llamacpp_provider::LlamaCppProvider;

use crate::config::SamplingConfig;

/// Core trait for generative model providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion. Implementations should poll `stop` between
    /// tokens and return early once it is raised.
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        stop: StopSignal,
    ) -> Result<String>;

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

impl From<&SamplingConfig> for GenerationConfig {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            repetition_penalty: config.repeat_penalty,
            stop_sequences: vec![],
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_stop_sequences(mut self, stops: &[&str]) -> Self {
        self.stop_sequences = stops.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Cooperative cancellation flag shared with a running generation.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both handles share one flag.
    pub fn same_as(&self, other: &StopSignal) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Why a bounded generation attempt produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation produced no usable text")]
    EmptyOutput,
    #[error("generation worker failed: {0}")]
    WorkerPanicked(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub context_window: usize,
    pub is_local: bool,
}

/// Hardware detection result
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub has_cuda: bool,
}

impl HardwareInfo {
    /// Auto-detect available hardware acceleration
    pub fn detect() -> Self {
        let has_cuda = Self::check_cuda();
        if has_cuda {
            tracing::info!("CUDA GPU detected");
        } else {
            tracing::info!("No GPU detected, will use CPU");
        }
        HardwareInfo { has_cuda }
    }

    fn check_cuda() -> bool {
        if std::env::var("CUDA_PATH").is_ok() || std::env::var("CUDA_HOME").is_ok() {
            return true;
        }

        #[cfg(not(target_os = "windows"))]
        let result = std::process::Command::new("nvidia-smi").output();
        #[cfg(target_os = "windows")]
        let result = std::process::Command::new("nvidia-smi.exe").output();

        result.map(|o| o.status.success()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_from_sampling() {
        let sampling = SamplingConfig::default();
        let config = GenerationConfig::from(&sampling).with_stop_sequences(&["</s>"]);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.repetition_penalty, 1.1);
        assert_eq!(config.stop_sequences, vec!["</s>".to_string()]);
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_raised());
        signal.raise();
        assert!(clone.is_raised());
    }

    #[test]
    fn test_timeout_error_is_flagged() {
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!GenerationError::EmptyOutput.is_timeout());
    }
}
