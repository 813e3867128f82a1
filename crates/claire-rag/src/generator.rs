//! Answer generation orchestrator.
//!
//! Decides how each question is answered: canned greeting, no-context
//! referral, model generation, or retrieval-only fallback when the model is
//! absent, cooling down after a timeout, or already busy.

use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ClaireConfig, DeviceProfile};
use crate::gate::{GateDecision, GateState, GenerationGate};
use crate::greetings::{GreetingClassifier, RandomChooser, ResponseChooser};
use crate::llm::llamacpp_provider::LlamaSettings;
use crate::llm::{BoundedGenerator, LLMProvider, LlamaCppProvider};
use crate::responses;
use crate::types::{GenerationMethod, GenerationRequest, GenerationResult};

pub struct AnswerGenerator {
    config: ClaireConfig,
    profile: DeviceProfile,
    greetings: GreetingClassifier,
    chooser: Box<dyn ResponseChooser>,
    gate: Arc<GenerationGate>,
    model: RwLock<Option<Arc<BoundedGenerator>>>,
}

impl AnswerGenerator {
    /// Resolve the hardware profile and load the GGUF model. A model that
    /// fails to load leaves the generator in retrieval-only mode.
    pub fn load(config: ClaireConfig) -> Self {
        let profile = config.resolve_profile();

        let provider: Option<Arc<dyn LLMProvider>> = if config.model.skip_loading {
            tracing::info!("Model loading skipped, running retrieval-only");
            None
        } else {
            match LlamaCppProvider::load(LlamaSettings::resolve(&config, profile)) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load CLAIRE model, running retrieval-only");
                    None
                }
            }
        };

        Self::new(config, profile, provider)
    }

    pub fn new(
        config: ClaireConfig,
        profile: DeviceProfile,
        provider: Option<Arc<dyn LLMProvider>>,
    ) -> Self {
        let timeout = config.generation_timeout(profile);
        let model = provider.map(|provider| {
            tracing::info!(
                provider = %provider.info().name,
                profile = ?profile,
                timeout_secs = timeout.as_secs(),
                cooldown_secs = config.cooldown().as_secs(),
                "Answer generator ready"
            );
            Arc::new(BoundedGenerator::new(provider, &config.sampling, timeout))
        });

        Self {
            greetings: GreetingClassifier::new(&config.greeting),
            chooser: Box::new(RandomChooser),
            gate: Arc::new(GenerationGate::new(config.cooldown())),
            model: RwLock::new(model),
            profile,
            config,
        }
    }

    pub fn with_chooser(mut self, chooser: impl ResponseChooser + 'static) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    pub fn with_greetings(mut self, greetings: GreetingClassifier) -> Self {
        self.greetings = greetings;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Drop the model and ask any in-flight generation to stop. Later
    /// requests are served retrieval-only.
    pub fn shutdown(&self) {
        let model = self.model.write().take();
        if let Some(model) = model {
            model.stop_in_flight();
            tracing::info!("Answer generator shut down, model released");
        }
    }

    /// Answer one request. Always returns a complete result; a panic
    /// anywhere in the routing yields the `error` method.
    pub async fn generate_answer(&self, request: &GenerationRequest) -> GenerationResult {
        let start = Instant::now();
        match AssertUnwindSafe(self.route(request, start)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(reason = %reason, "Critical error in answer generation");
                GenerationResult {
                    answer: responses::error_response(request.language).to_string(),
                    success: false,
                    method: GenerationMethod::Error,
                    generation_time: start.elapsed().as_secs_f64(),
                    timed_out: false,
                }
            }
        }
    }

    async fn route(&self, request: &GenerationRequest, start: Instant) -> GenerationResult {
        let language = request.language;

        if let Some(kind) = self.greetings.classify(&request.question, language) {
            tracing::info!(kind = kind.as_str(), "Detected greeting message");
            let answer = self
                .greetings
                .respond(kind, language, request.emotion, self.chooser.as_ref());
            return self.finish(request, answer, GenerationMethod::GreetingResponse, start, false);
        }

        if request.contexts.is_empty() && request.attachment_text().is_none() {
            tracing::info!("No contexts retrieved");
            let answer = responses::no_context_response(language);
            return self.finish(request, answer, GenerationMethod::NoContext, start, false);
        }

        let model = self.model.read().clone();
        let Some(model) = model else {
            tracing::info!("Model not loaded, using retrieval-only");
            return self.retrieval(request, GenerationMethod::RetrievalOnlyNoModel, start, false);
        };

        let permit = match self.gate.try_acquire() {
            GateDecision::Admitted(permit) => permit,
            GateDecision::CoolingDown { remaining } => {
                tracing::info!(
                    remaining_secs = remaining.as_secs(),
                    "Skipping generation due to recent timeout"
                );
                return self.retrieval(request, GenerationMethod::RetrievalOnlyCooldown, start, false);
            }
            GateDecision::Busy => {
                tracing::warn!("Already generating, skipping to retrieval-only");
                return self.retrieval(request, GenerationMethod::RetrievalOnlyBusy, start, false);
            }
        };

        tracing::info!(contexts = request.contexts.len(), "Attempting CLAIRE generation");
        let timed_out = match model.answer(request, permit).await {
            Ok(answer) => {
                let elapsed = start.elapsed().as_secs_f64();
                tracing::info!(generation_secs = format!("{:.2}", elapsed), "CLAIRE generation successful");
                return self.finish(request, answer, GenerationMethod::ClaireRag, start, false);
            }
            Err(e) if e.is_timeout() => {
                self.gate.record_timeout();
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Generation failed, using retrieval-only");
                false
            }
        };

        self.retrieval(request, GenerationMethod::RetrievalOnly, start, timed_out)
    }

    fn retrieval(
        &self,
        request: &GenerationRequest,
        method: GenerationMethod,
        start: Instant,
        timed_out: bool,
    ) -> GenerationResult {
        let mut answer = responses::retrieval_answer(
            request.language,
            request.emotion,
            &request.contexts,
            request.attachment_text(),
        );
        if timed_out {
            answer = responses::with_timeout_note(answer, request.language);
        }
        self.finish(request, answer, method, start, timed_out)
    }

    fn finish(
        &self,
        request: &GenerationRequest,
        answer: String,
        method: GenerationMethod,
        start: Instant,
        timed_out: bool,
    ) -> GenerationResult {
        let answer = responses::ensure_answer(
            answer,
            request.language,
            self.config.pipeline.min_answer_chars,
        );
        GenerationResult {
            answer,
            success: true,
            method,
            generation_time: start.elapsed().as_secs_f64(),
            timed_out,
        }
    }
}
