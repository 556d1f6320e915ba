//! Candle-backed inference runtime.
//!
//! Loads GGUF quantized weights on the CPU through a buffered reader and
//! implements the [`runtime`](crate::runtime) traits on top of
//! `candle_transformers` quantized models.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::{quantized_llama, quantized_phi3, quantized_qwen2};
use serde::{Deserialize, Serialize};

use crate::artifact::validate_artifact;
use crate::config::PipelineConfig;
use crate::profile::{detect_family, GenerationProfile, ModelFamily};
use crate::runtime::{ContextHandle, ContextParams, InferenceBackend, ModelHandle, ModelParams};
use crate::tokenizer::CandleVocab;

// ---------------------------------------------------------------------------
// Architecture
// ---------------------------------------------------------------------------

/// Weight layout of a GGUF file, from `general.architecture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelArchitecture {
    Llama,
    Phi3,
    Qwen2,
}

impl ModelArchitecture {
    /// Unknown names use the Llama loader, which most small chat models share.
    pub fn from_gguf_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "phi3" => Self::Phi3,
            "qwen2" => Self::Qwen2,
            _ => Self::Llama,
        }
    }
}

impl std::fmt::Display for ModelArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Llama => "llama",
            Self::Phi3 => "phi3",
            Self::Qwen2 => "qwen2",
        };
        f.write_str(s)
    }
}

enum Weights {
    Llama(quantized_llama::ModelWeights),
    Phi3(quantized_phi3::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl Weights {
    fn forward(&mut self, input: &Tensor, position: usize) -> candle_core::Result<Tensor> {
        match self {
            Self::Llama(m) => m.forward(input, position),
            Self::Phi3(m) => m.forward(input, position),
            Self::Qwen2(m) => m.forward(input, position),
        }
    }
}

fn metadata_str<'a>(content: &'a gguf_file::Content, key: &str) -> Option<&'a String> {
    content.metadata.get(key).and_then(|v| v.to_string().ok())
}

fn metadata_u32(content: &gguf_file::Content, key: &str) -> Option<u32> {
    content.metadata.get(key).and_then(|v| v.to_u32().ok())
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// CPU-only candle backend.
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    pub fn init() -> Result<Self> {
        tracing::debug!("candle backend initialized on CPU");
        Ok(Self {
            device: Device::Cpu,
        })
    }
}

impl Drop for CandleBackend {
    fn drop(&mut self) {
        tracing::debug!("candle backend released");
    }
}

impl InferenceBackend for CandleBackend {
    type Model = CandleModel;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<CandleModel> {
        if params.gpu_layers > 0 {
            bail!("GPU offload is not supported ({} layers requested)", params.gpu_layers);
        }
        if params.use_mmap {
            tracing::debug!("memory mapping requested; candle reads weights through a buffer");
        }

        let mut reader = BufReader::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        );
        let content = gguf_file::Content::read(&mut reader).context("failed to parse GGUF")?;

        let architecture = ModelArchitecture::from_gguf_name(
            metadata_str(&content, "general.architecture").map_or("llama", String::as_str),
        );
        let max_seq_len = metadata_u32(&content, &format!("{architecture}.context_length"))
            .map_or(4096, |v| v as usize);
        let eos_token_id = metadata_u32(&content, "tokenizer.ggml.eos_token_id");

        tracing::info!(path = %path.display(), %architecture, max_seq_len, "loading GGUF weights");
        let weights = match architecture {
            ModelArchitecture::Llama => {
                quantized_llama::ModelWeights::from_gguf(content, &mut reader, &self.device)
                    .map(Weights::Llama)
            }
            ModelArchitecture::Phi3 => {
                quantized_phi3::ModelWeights::from_gguf(false, content, &mut reader, &self.device)
                    .map(Weights::Phi3)
            }
            ModelArchitecture::Qwen2 => {
                quantized_qwen2::ModelWeights::from_gguf(content, &mut reader, &self.device)
                    .map(Weights::Qwen2)
            }
        }
        .with_context(|| format!("failed to load {architecture} weights"))?;

        Ok(CandleModel {
            weights: Some(weights),
            architecture,
            device: self.device.clone(),
            max_seq_len,
            eos_token_id,
            path: path.to_path_buf(),
        })
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Loaded weights. Bound to a single context per request, since the KV
/// cache lives inside the weights.
pub struct CandleModel {
    weights: Option<Weights>,
    architecture: ModelArchitecture,
    device: Device,
    max_seq_len: usize,
    eos_token_id: Option<u32>,
    path: PathBuf,
}

impl CandleModel {
    pub fn architecture(&self) -> ModelArchitecture {
        self.architecture
    }
}

impl Drop for CandleModel {
    fn drop(&mut self) {
        tracing::debug!(architecture = %self.architecture, "model released");
    }
}

impl ModelHandle for CandleModel {
    type Context = CandleContext;
    type Vocab = CandleVocab;

    fn new_context(&mut self, params: &ContextParams) -> Result<CandleContext> {
        if params.context_size > self.max_seq_len {
            bail!(
                "context of {} tokens exceeds the model's {}",
                params.context_size,
                self.max_seq_len
            );
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .context("failed to build inference thread pool")?;
        let weights = self
            .weights
            .take()
            .context("model weights are already bound to a context")?;

        tracing::debug!(
            context_size = params.context_size,
            batch_size = params.batch_size,
            threads = params.threads,
            "context created"
        );
        Ok(CandleContext {
            weights,
            device: self.device.clone(),
            pool,
            context_size: params.context_size,
            position: 0,
            logits: None,
        })
    }

    fn vocab(&self) -> Result<CandleVocab> {
        let vocab = CandleVocab::for_model(&self.path, self.eos_token_id)?;
        tracing::debug!(
            architecture = %self.architecture(),
            eog_ids = ?vocab.eog_ids(),
            "vocabulary ready"
        );
        Ok(vocab)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// KV cache position and last logits. Forward passes run on a private pool
/// with the configured thread count.
pub struct CandleContext {
    weights: Weights,
    device: Device,
    pool: rayon::ThreadPool,
    context_size: usize,
    position: usize,
    logits: Option<Vec<f32>>,
}

impl Drop for CandleContext {
    fn drop(&mut self) {
        tracing::debug!(position = self.position, "context released");
    }
}

impl ContextHandle for CandleContext {
    fn decode(&mut self, tokens: &[u32]) -> Result<()> {
        if tokens.is_empty() {
            bail!("empty decode batch");
        }
        if self.position + tokens.len() > self.context_size {
            bail!(
                "context window exhausted ({} + {} > {})",
                self.position,
                tokens.len(),
                self.context_size
            );
        }

        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let position = self.position;
        let weights = &mut self.weights;
        let logits = self
            .pool
            .install(|| weights.forward(&input, position))
            .with_context(|| format!("forward pass at position {position}"))?;

        // (1, vocab) or (1, seq, vocab): keep the last position.
        let logits = logits.squeeze(0)?;
        let logits = if logits.dims().len() == 2 {
            logits.get(logits.dim(0)? - 1)?
        } else {
            logits
        };
        self.logits = Some(logits.to_dtype(DType::F32)?.to_vec1::<f32>()?);
        self.position += tokens.len();
        Ok(())
    }

    fn logits(&self) -> Result<Vec<f32>> {
        self.logits.clone().context("no logits: nothing decoded yet")
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// What a model file is and how it would be run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub file_size: u64,
    pub architecture: String,
    pub name: String,
    pub context_length: u64,
    pub tensor_count: usize,
    pub family: ModelFamily,
    pub profile: GenerationProfile,
}

/// Validate `path` and read its GGUF header without loading weights.
pub fn inspect_artifact(path: &Path, config: &PipelineConfig) -> Result<ArtifactInfo> {
    validate_artifact(path, config.min_model_bytes)?;

    let file_size = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
    );
    let content = gguf_file::Content::read(&mut reader).context("failed to parse GGUF")?;

    let architecture = metadata_str(&content, "general.architecture")
        .cloned()
        .unwrap_or_default();
    let name = metadata_str(&content, "general.name").cloned().unwrap_or_default();
    let arch_key = if architecture.is_empty() {
        "llama"
    } else {
        architecture.as_str()
    };
    let context_length = metadata_u32(&content, &format!("{arch_key}.context_length"))
        .map_or(0, u64::from);

    let family = detect_family(path);
    Ok(ArtifactInfo {
        file_size,
        architecture,
        name,
        context_length,
        tensor_count: content.tensor_infos.len(),
        family,
        profile: family.profile(),
    })
}
