//! llama.cpp LLM provider: native local inference via llama-cpp-2 bindings.
//!
//! Loads the CLAIRE GGUF model and runs inference on CPU (optionally with
//! GPU layer offload). llama.cpp is synchronous and CPU-bound, so every
//! call runs on `spawn_blocking` and polls a [`StopSignal`] between tokens.

use anyhow::{anyhow, Context as AnyhowContext, Result};
use async_trait::async_trait;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::sampling::LlamaSampler;

use super::{GenerationConfig, LLMProvider, ProviderInfo, StopSignal};
use crate::config::{ClaireConfig, DeviceProfile};

/// Load-time settings resolved from [`ClaireConfig`] for one hardware profile.
#[derive(Debug, Clone)]
pub struct LlamaSettings {
    pub model_path: PathBuf,
    pub context_size: u32,
    pub batch_size: u32,
    pub gpu_layers: u32,
    pub threads: i32,
}

impl LlamaSettings {
    pub fn resolve(config: &ClaireConfig, profile: DeviceProfile) -> Self {
        Self {
            model_path: config.model_path(profile),
            context_size: config.model.context_size,
            batch_size: config.batch_size(profile),
            gpu_layers: config.gpu_layers(profile),
            threads: config.threads(),
        }
    }
}

pub struct LlamaCppProvider {
    model: Arc<LlamaModel>,
    backend: Arc<LlamaBackend>,
    settings: LlamaSettings,
    name: String,
}

// SAFETY: LlamaModel and LlamaBackend are thread-safe for read-only operations.
// Mutable state (LlamaContext) is created per-inference call and not shared.
unsafe impl Send for LlamaCppProvider {}
unsafe impl Sync for LlamaCppProvider {}

impl LlamaCppProvider {
    pub fn load(settings: LlamaSettings) -> Result<Self> {
        let path = &settings.model_path;
        if !path.exists() {
            return Err(anyhow!("GGUF model file not found: {}", path.display()));
        }

        let size_gb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0 * 1024.0))
            .unwrap_or(0.0);
        tracing::info!(
            path = %path.display(),
            size_gb = format!("{:.2}", size_gb),
            gpu_layers = settings.gpu_layers,
            threads = settings.threads,
            "Loading GGUF model via llama.cpp"
        );

        let backend = LlamaBackend::init().context("Failed to initialize llama.cpp backend")?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(settings.gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| anyhow!("Failed to load GGUF model from {}: {:?}", path.display(), e))?;

        let name = Self::display_name(path);
        tracing::info!(
            model = %name,
            context_window = settings.context_size,
            "llama.cpp model loaded successfully"
        );

        Ok(Self {
            model: Arc::new(model),
            backend: Arc::new(backend),
            settings,
            name,
        })
    }

    fn display_name(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "claire".to_string())
    }

    /// Run synchronous inference. Returns whatever was produced when `stop` is raised.
    fn run_inference(
        model: &LlamaModel,
        backend: &LlamaBackend,
        settings: &LlamaSettings,
        prompt: &str,
        config: &GenerationConfig,
        stop: &StopSignal,
    ) -> Result<String> {
        let n_ctx = settings.context_size;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(settings.batch_size)
            .with_n_threads(settings.threads)
            .with_n_threads_batch(settings.threads);
        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| anyhow!("Failed to create llama context: {:?}", e))?;

        let tokens = model
            .str_to_token(prompt, llama_cpp_2::model::AddBos::Always)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

        let n_prompt = tokens.len();
        if n_prompt == 0 {
            return Ok(String::new());
        }

        // Keep the tail of the prompt (the input block and output marker) if it overflows.
        let max_prompt_tokens = (n_ctx as usize).saturating_sub(config.max_tokens.min(n_ctx as usize / 2));
        let tokens = if n_prompt > max_prompt_tokens {
            tracing::warn!(
                n_prompt = n_prompt,
                max = max_prompt_tokens,
                "Prompt truncated to fit context window"
            );
            tokens[n_prompt - max_prompt_tokens..].to_vec()
        } else {
            tokens
        };
        let n_prompt = tokens.len();

        let n_batch = settings.batch_size.max(1) as usize;
        let mut batch = LlamaBatch::new(n_batch, 1);

        let mut processed = 0usize;
        while processed < n_prompt {
            if stop.is_raised() {
                return Ok(String::new());
            }
            batch.clear();
            let chunk_end = (processed + n_batch).min(n_prompt);

            for (i, token) in tokens.iter().enumerate().take(chunk_end).skip(processed) {
                let is_last = i == n_prompt - 1;
                batch
                    .add(*token, i as i32, &[0], is_last)
                    .map_err(|_| anyhow!("Failed to add token to batch"))?;
            }

            ctx.decode(&mut batch)
                .map_err(|e| anyhow!("Prompt decode chunk {}-{} failed: {:?}", processed, chunk_end, e))?;

            processed = chunk_end;
        }

        // penalties(last_n, repeat_penalty, freq_penalty, presence_penalty)
        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::penalties(64, config.repetition_penalty, 0.0, 0.0),
            LlamaSampler::temp(config.temperature),
            LlamaSampler::top_p(config.top_p, 1),
            LlamaSampler::dist(config.seed.unwrap_or(0) as u32),
        ]);

        let max_tokens = config.max_tokens;
        let mut output = String::new();
        let mut n_decoded = 0usize;
        let mut cur_pos = n_prompt as i32;

        let eos_token = model.token_eos();

        loop {
            if n_decoded >= max_tokens || cur_pos as u32 >= n_ctx {
                break;
            }
            if stop.is_raised() {
                tracing::debug!(tokens = n_decoded, "Stop requested, abandoning generation");
                break;
            }

            let new_token = sampler.sample(&ctx, -1);
            if new_token == eos_token {
                break;
            }

            #[allow(deprecated)]
            let token_str = model
                .token_to_str(new_token, llama_cpp_2::model::Special::Tokenize)
                .unwrap_or_default();
            output.push_str(&token_str);

            if let Some(seq) = config.stop_sequences.iter().find(|seq| output.ends_with(seq.as_str())) {
                output.truncate(output.len() - seq.len());
                break;
            }

            // Break small-model loops: same 30-80 char block repeated 3+ times
            if n_decoded > 100 && n_decoded % 50 == 0 {
                let tail_start = output.len().saturating_sub(300);
                let tail_start = (tail_start..=output.len())
                    .find(|i| output.is_char_boundary(*i))
                    .unwrap_or(output.len());
                if has_repetition(&output[tail_start..]) {
                    tracing::warn!(tokens = n_decoded, "Repetition detected, stopping generation");
                    break;
                }
            }

            n_decoded += 1;

            batch.clear();
            batch
                .add(new_token, cur_pos, &[0], true)
                .map_err(|_| anyhow!("Failed to add generated token to batch"))?;
            cur_pos += 1;

            ctx.decode(&mut batch)
                .map_err(|e| anyhow!("Decode step {} failed: {:?}", n_decoded, e))?;
        }

        tracing::debug!(
            prompt_tokens = n_prompt,
            generated_tokens = n_decoded,
            "llama.cpp inference complete"
        );

        Ok(output)
    }
}

/// Detect if text ends with a block that already appeared twice before.
fn has_repetition(text: &str) -> bool {
    let bytes = text.as_bytes();
    let len = bytes.len();
    if len < 100 {
        return false;
    }

    for block_size in [30, 50, 80] {
        if len < block_size * 3 {
            continue;
        }
        let last_block = &bytes[len - block_size..];
        let count = bytes[..len - block_size]
            .windows(block_size)
            .filter(|w| *w == last_block)
            .count();
        if count >= 2 {
            return true;
        }
    }

    false
}

#[async_trait]
impl LLMProvider for LlamaCppProvider {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        stop: StopSignal,
    ) -> Result<String> {
        let model = Arc::clone(&self.model);
        let backend = Arc::clone(&self.backend);
        let settings = self.settings.clone();
        let prompt = prompt.to_string();
        let config = config.clone();

        tokio::task::spawn_blocking(move || {
            Self::run_inference(&model, &backend, &settings, &prompt, &config, &stop)
        })
        .await
        .map_err(|e| anyhow!("Inference task panicked: {}", e))?
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: format!("llama.cpp ({})", self.name),
            model: self.name.clone(),
            context_window: self.settings.context_size as usize,
            is_local: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetition_detected() {
        let block = "Please call 889-10000 for help. ";
        let text = block.repeat(5);
        assert!(has_repetition(&text));
    }

    #[test]
    fn test_no_repetition_in_varied_text() {
        let text = "To reset your password, open the BPI app and tap Forgot Password. \
                    You will receive a one-time PIN on your registered mobile number. \
                    Enter it and choose a new password.";
        assert!(!has_repetition(text));
    }

    #[test]
    fn test_missing_model_file_is_an_error() {
        let settings = LlamaSettings {
            model_path: PathBuf::from("/nonexistent/claire.gguf"),
            context_size: 2048,
            batch_size: 256,
            gpu_layers: 0,
            threads: 1,
        };
        let err = LlamaCppProvider::load(settings).err().unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_settings_follow_profile() {
        let config = ClaireConfig::default();
        let cpu = LlamaSettings::resolve(&config, DeviceProfile::CpuOnly);
        assert_eq!(cpu.gpu_layers, 0);
        assert_eq!(cpu.batch_size, 256);
        assert_eq!(cpu.context_size, 2048);
    }
}
