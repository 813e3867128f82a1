//! Generation with a hard wall-clock ceiling.
//!
//! The provider call runs on its own tokio task, which owns the gate
//! permit. The caller waits at most `timeout`. On expiry, or if the caller
//! itself is dropped, the task is aborted and the stop signal raised, but
//! the caller never joins it. The slot frees once the task is torn down.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

use super::prompt::{build_prompt, clean_generated_text, STOP_SEQUENCES};
use super::{GenerationConfig, GenerationError, LLMProvider, StopSignal};
use crate::config::SamplingConfig;
use crate::context::format_prompt_contexts;
use crate::gate::GenerationPermit;
use crate::types::GenerationRequest;

pub struct BoundedGenerator {
    provider: Arc<dyn LLMProvider>,
    config: GenerationConfig,
    timeout: Duration,
    in_flight: Mutex<Option<StopSignal>>,
}

impl BoundedGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, sampling: &SamplingConfig, timeout: Duration) -> Self {
        Self {
            provider,
            config: GenerationConfig::from(sampling).with_stop_sequences(STOP_SEQUENCES),
            timeout,
            in_flight: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn provider_name(&self) -> String {
        self.provider.info().name
    }

    /// Build the CLAIRE prompt for `request` and generate a cleaned answer.
    pub async fn answer(
        &self,
        request: &GenerationRequest,
        permit: GenerationPermit,
    ) -> Result<String, GenerationError> {
        let contexts_block = format_prompt_contexts(&request.contexts, request.attachment_text());
        let prompt = build_prompt(
            &request.question,
            request.language,
            request.emotion,
            &contexts_block,
        );
        tracing::debug!(prompt_chars = prompt.len(), "Generating with Alpaca format prompt");
        self.generate(prompt, permit).await
    }

    /// Run one prompt under the timeout and clean the output. `permit` is
    /// released when the worker task ends, not when this future does.
    pub async fn generate(
        &self,
        prompt: String,
        permit: GenerationPermit,
    ) -> Result<String, GenerationError> {
        let stop = StopSignal::new();
        *self.in_flight.lock() = Some(stop.clone());

        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let worker_stop = stop.clone();
        let mut handle = tokio::spawn(async move {
            let result = provider.generate(&prompt, &config, worker_stop).await;
            drop(permit);
            result
        });
        let mut guard = InFlightGuard {
            slot: &self.in_flight,
            stop,
            handle: handle.abort_handle(),
            settled: false,
        };

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(raw))) => {
                let cleaned = clean_generated_text(&raw);
                if cleaned.is_empty() {
                    Err(GenerationError::EmptyOutput)
                } else {
                    Ok(cleaned)
                }
            }
            Ok(Ok(Err(e))) => Err(GenerationError::Failed(e)),
            Ok(Err(join_err)) => Err(GenerationError::WorkerPanicked(join_err.to_string())),
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs_f64(), "Generation timed out, abandoning worker");
                return Err(GenerationError::Timeout(self.timeout));
            }
        };

        guard.settled = true;
        outcome
    }

    /// Ask the current generation, if any, to stop.
    pub fn stop_in_flight(&self) {
        if let Some(stop) = self.in_flight.lock().as_ref() {
            stop.raise();
        }
    }
}

/// Clears the in-flight slot however `generate` exits. Unless the worker
/// already finished, also raises stop and aborts it.
struct InFlightGuard<'a> {
    slot: &'a Mutex<Option<StopSignal>>,
    stop: StopSignal,
    handle: AbortHandle,
    settled: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.stop.raise();
            self.handle.abort();
        }
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|current| current.same_as(&self.stop)) {
            *slot = None;
        }
    }
}
