use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::HardwareInfo;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClaireConfig {
    pub model: ModelConfig,
    pub sampling: SamplingConfig,
    pub timeouts: TimeoutConfig,
    pub greeting: GreetingConfig,
    pub pipeline: PipelineConfig,
    pub device: DevicePreference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Q4_K_M quantized GGUF, used on CPU and as the accelerated fallback.
    pub q4_model_path: PathBuf,
    /// F16 GGUF, preferred when a GPU is available.
    pub f16_model_path: PathBuf,
    /// Pick the model file from the hardware profile. When false the Q4 file is always used.
    pub auto_select: bool,
    /// Run retrieval-only without even trying to load the model.
    pub skip_loading: bool,
    pub context_size: u32,
    pub batch_size_gpu: u32,
    pub batch_size_cpu: u32,
    pub gpu_layers: u32,
    /// CPU threads for llama.cpp. `None` means cores - 1.
    pub threads: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub accelerated_secs: u64,
    pub cpu_secs: u64,
    /// Generation is skipped for this long after a timeout.
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    pub enabled: bool,
    /// Messages longer than this (in characters) are never treated as greetings.
    pub short_message_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub top_k: usize,
    /// Classifier predictions below this are replaced by the default label.
    pub confidence_threshold: f32,
    pub max_context_chars: usize,
    pub max_attachment_chars: usize,
    pub min_answer_chars: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// Resolved hardware profile. Drives timeouts, batch size and model file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    Accelerated,
    CpuOnly,
}

impl DeviceProfile {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Accelerated)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let model_dir = default_model_dir();
        Self {
            q4_model_path: model_dir.join("claire_v1.0.0_q4_k_m.gguf"),
            f16_model_path: model_dir.join("claire_v1.0.0_f16.gguf"),
            auto_select: true,
            skip_loading: false,
            context_size: 2048,
            batch_size_gpu: 512,
            batch_size_cpu: 256,
            gpu_layers: 35,
            threads: None,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            accelerated_secs: 120,
            cpu_secs: 300,
            cooldown_secs: 60,
        }
    }
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            short_message_threshold: 20,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            confidence_threshold: 0.3,
            max_context_chars: 500,
            max_attachment_chars: 1000,
            min_answer_chars: 10,
        }
    }
}

fn default_model_dir() -> PathBuf {
    if Path::new("models").exists() {
        PathBuf::from("models")
    } else if let Ok(env_path) = std::env::var("MODEL_PATH") {
        PathBuf::from(env_path)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("claire-rag")
            .join("models")
    }
}

impl ClaireConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.context_size < 256 {
            return Err("model.context_size must be >= 256".into());
        }
        if self.sampling.max_tokens == 0 {
            return Err("sampling.max_tokens must be > 0".into());
        }
        if self.sampling.temperature < 0.0 {
            return Err("sampling.temperature must be >= 0.0".into());
        }
        if !(0.0..=1.0).contains(&self.sampling.top_p) || self.sampling.top_p == 0.0 {
            return Err("sampling.top_p must be in (0.0, 1.0]".into());
        }
        if self.sampling.repeat_penalty <= 0.0 {
            return Err("sampling.repeat_penalty must be > 0.0".into());
        }
        if self.timeouts.accelerated_secs == 0 || self.timeouts.cpu_secs == 0 {
            return Err("timeouts must be > 0 seconds".into());
        }
        if self.pipeline.top_k == 0 {
            return Err("pipeline.top_k must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.pipeline.confidence_threshold) {
            return Err("pipeline.confidence_threshold must be in [0.0, 1.0]".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply deployment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("USE_CUDA") {
            self.device = match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => DevicePreference::Cuda,
                "false" | "0" | "no" => DevicePreference::Cpu,
                _ => DevicePreference::Auto,
            };
        }
        if let Some(path) = lookup("CLAIRE_MODEL_PATH") {
            self.model.q4_model_path = PathBuf::from(path);
            self.model.auto_select = false;
        }
        if let Some(value) = lookup("SKIP_MODEL_LOADING") {
            self.model.skip_loading = matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(secs) = lookup("MODEL_INFERENCE_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.timeouts.accelerated_secs = secs;
        }
        if let Some(secs) = lookup("MODEL_INFERENCE_TIMEOUT_CPU").and_then(|v| v.trim().parse().ok()) {
            self.timeouts.cpu_secs = secs;
        }
        if let Some(secs) = lookup("GENERATION_TIMEOUT_COOLDOWN").and_then(|v| v.trim().parse().ok()) {
            self.timeouts.cooldown_secs = secs;
        }
        if let Some(value) = lookup("LLAMA_CPP_THREADS") {
            let value = value.trim();
            if value != "auto" {
                self.model.threads = value.parse().ok();
            }
        }
    }

    /// Resolve the hardware profile from the device preference.
    pub fn resolve_profile(&self) -> DeviceProfile {
        match self.device {
            DevicePreference::Cpu => DeviceProfile::CpuOnly,
            DevicePreference::Cuda | DevicePreference::Auto => {
                let hw = HardwareInfo::detect();
                if hw.has_cuda {
                    DeviceProfile::Accelerated
                } else {
                    if self.device == DevicePreference::Cuda {
                        tracing::warn!("CUDA requested but not available, falling back to CPU");
                    }
                    DeviceProfile::CpuOnly
                }
            }
        }
    }

    pub fn generation_timeout(&self, profile: DeviceProfile) -> Duration {
        match profile {
            DeviceProfile::Accelerated => Duration::from_secs(self.timeouts.accelerated_secs),
            DeviceProfile::CpuOnly => Duration::from_secs(self.timeouts.cpu_secs),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.timeouts.cooldown_secs)
    }

    pub fn batch_size(&self, profile: DeviceProfile) -> u32 {
        match profile {
            DeviceProfile::Accelerated => self.model.batch_size_gpu,
            DeviceProfile::CpuOnly => self.model.batch_size_cpu,
        }
    }

    pub fn gpu_layers(&self, profile: DeviceProfile) -> u32 {
        match profile {
            DeviceProfile::Accelerated => self.model.gpu_layers,
            DeviceProfile::CpuOnly => 0,
        }
    }

    pub fn threads(&self) -> i32 {
        self.model.threads.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            cores.saturating_sub(1).max(1) as i32
        })
    }

    /// Model file for this profile: F16 when accelerated and present, Q4 otherwise.
    pub fn model_path(&self, profile: DeviceProfile) -> PathBuf {
        if self.model.auto_select && profile.is_accelerated() {
            if self.model.f16_model_path.exists() {
                tracing::info!(path = %self.model.f16_model_path.display(), "GPU detected, using F16 model");
                return self.model.f16_model_path.clone();
            }
            tracing::info!("GPU detected but F16 model not found, using Q4 model");
        }
        self.model.q4_model_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClaireConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.cooldown_secs, 60);
        assert_eq!(config.greeting.short_message_threshold, 20);
        assert_eq!(config.pipeline.top_k, 4);
    }

    #[test]
    fn test_profile_dependent_values() {
        let config = ClaireConfig::default();
        assert_eq!(config.generation_timeout(DeviceProfile::CpuOnly), Duration::from_secs(300));
        assert_eq!(config.generation_timeout(DeviceProfile::Accelerated), Duration::from_secs(120));
        assert_eq!(config.batch_size(DeviceProfile::CpuOnly), 256);
        assert_eq!(config.gpu_layers(DeviceProfile::CpuOnly), 0);
        assert_eq!(config.gpu_layers(DeviceProfile::Accelerated), 35);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"timeouts": {"cooldown_secs": 5}, "device": "cpu"}"#;
        let config: ClaireConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeouts.cooldown_secs, 5);
        assert_eq!(config.timeouts.cpu_secs, 300);
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.resolve_profile(), DeviceProfile::CpuOnly);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClaireConfig::default();
        config.sampling.top_p = 0.0;
        assert!(config.validate().is_err());

        let mut config = ClaireConfig::default();
        config.pipeline.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("USE_CUDA", "false"),
            ("SKIP_MODEL_LOADING", "true"),
            ("MODEL_INFERENCE_TIMEOUT_CPU", "90"),
            ("GENERATION_TIMEOUT_COOLDOWN", "15"),
            ("LLAMA_CPP_THREADS", "3"),
            ("CLAIRE_MODEL_PATH", "/opt/claire.gguf"),
        ]
        .into_iter()
        .collect();

        let mut config = ClaireConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.device, DevicePreference::Cpu);
        assert!(config.model.skip_loading);
        assert_eq!(config.timeouts.cpu_secs, 90);
        assert_eq!(config.timeouts.cooldown_secs, 15);
        assert_eq!(config.threads(), 3);
        assert_eq!(config.model_path(DeviceProfile::Accelerated), PathBuf::from("/opt/claire.gguf"));
    }

    #[test]
    fn test_garbage_env_values_are_ignored() {
        let mut config = ClaireConfig::default();
        config.apply_overrides(|key| match key {
            "MODEL_INFERENCE_TIMEOUT" => Some("soon".to_string()),
            "LLAMA_CPP_THREADS" => Some("auto".to_string()),
            _ => None,
        });
        assert_eq!(config.timeouts.accelerated_secs, 120);
        assert!(config.model.threads.is_none());
        assert!(config.threads() >= 1);
    }
}
