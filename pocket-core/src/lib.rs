//! Pocket Core -- on-device text generation pipeline.
//!
//! Validates a GGUF model file, picks a fixed decoding profile for the
//! model's family, runs a bounded sample/decode loop on the CPU and returns
//! a cleaned response. Every failure becomes one fixed user-facing message.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod profile;
pub mod prompt;
pub mod runtime;
pub mod sampling;
pub mod sanitize;
pub mod tokenizer;

pub use artifact::validate_artifact;
pub use config::PipelineConfig;
pub use engine::{GeneratedText, GenerationEngine, GenerationOutcome, StopReason, TokenSequence};
pub use error::{ErrorKind, GenerateError};
pub use model::{inspect_artifact, ArtifactInfo, CandleBackend, ModelArchitecture};
pub use profile::{detect_family, select_profile, GenerationProfile, ModelFamily};
pub use prompt::{truncate_history, ChatMessage, PromptFormat, Role};
pub use runtime::InferenceBackend;
pub use sanitize::sanitize;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model_path: PathBuf,
    /// Fully formatted prompt, passed to the model as-is.
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(model_path: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            prompt: prompt.into(),
        }
    }
}

/// Validation, profile selection, generation and sanitizing for one
/// request at a time. Holds no state between requests.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Fails when `config` does not pass [`PipelineConfig::validate`].
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `request` on the candle CPU runtime.
    pub fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        self.generate_with(request, |_| CandleBackend::init())
    }

    /// Run `request` on the backend produced by `init_backend`.
    ///
    /// The backend is only initialized once the artifact has passed
    /// validation.
    pub fn generate_with<B, F>(
        &self,
        request: &GenerationRequest,
        init_backend: F,
    ) -> Result<String, GenerateError>
    where
        B: InferenceBackend,
        F: FnOnce(&PipelineConfig) -> anyhow::Result<B>,
    {
        let path = request.model_path.as_path();
        validate_artifact(path, self.config.min_model_bytes)?;

        let family = detect_family(path);
        tracing::info!(path = %path.display(), %family, profile = ?family.profile(), "profile selected");

        let backend = init_backend(&self.config).map_err(GenerateError::ModelLoadFailure)?;
        let outcome = GenerationEngine::new(&self.config, family).run(backend, path, &request.prompt)?;

        sanitize::clean_response(&outcome.text.into_string())
    }

    /// Like [`Pipeline::generate`], with failures rendered as their fixed
    /// message.
    pub fn respond(&self, request: &GenerationRequest) -> String {
        self.generate(request).unwrap_or_else(|e| {
            tracing::warn!(kind = ?e.kind(), error = %e, "request failed");
            e.user_message().to_string()
        })
    }
}

/// Generate a response for `prompt` with the default limits.
///
/// Always returns text: the response, or the fixed message for whatever went
/// wrong.
pub fn respond(model_path: impl AsRef<Path>, prompt: &str) -> String {
    Pipeline::default().respond(&GenerationRequest::new(model_path.as_ref(), prompt))
}
