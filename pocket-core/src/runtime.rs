//! Seam between the pipeline and an inference runtime.
//!
//! The engine only ever talks to these traits. Each handle is owned by the
//! request that acquired it and releases its runtime resources on drop, so
//! every exit path of a request leaves nothing allocated.

use std::path::Path;

use anyhow::Result;

/// How the runtime should place model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelParams {
    /// Layers offloaded to an accelerator.
    pub gpu_layers: usize,
    pub use_mmap: bool,
}

impl ModelParams {
    /// CPU execution with weights read into owned memory.
    pub const fn cpu_only() -> Self {
        Self {
            gpu_layers: 0,
            use_mmap: false,
        }
    }
}

/// Shape of an inference context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub context_size: usize,
    pub batch_size: usize,
    pub threads: usize,
}

/// An initialized runtime backend. Dropping it shuts the backend down.
pub trait InferenceBackend {
    type Model: ModelHandle;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model>;
}

/// Loaded model weights.
pub trait ModelHandle {
    type Context: ContextHandle;
    type Vocab: Vocabulary;

    fn new_context(&mut self, params: &ContextParams) -> Result<Self::Context>;

    fn vocab(&self) -> Result<Self::Vocab>;
}

/// Decoding state (KV cache and position) for one request.
pub trait ContextHandle {
    /// Feed `tokens` as one batch, advancing the position.
    fn decode(&mut self, tokens: &[u32]) -> Result<()>;

    /// Logits for the last decoded position.
    fn logits(&self) -> Result<Vec<f32>>;
}

pub trait Vocabulary {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<u32>>;

    /// Text added by `token` after the tokens already converted in this
    /// request, special tokens included. Empty while a character is still
    /// incomplete.
    fn token_to_piece(&mut self, token: u32) -> Result<String>;

    /// Whether `token` ends generation.
    fn is_eog(&self, token: u32) -> bool;
}
