//! Tunable limits of the generation pipeline.
//!
//! Defaults are the values the mobile app shipped with. The heuristic
//! ratios are empirically tuned; change them only on purpose.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Files smaller than this are treated as a broken download.
pub const MIN_MODEL_BYTES: u64 = 1_000_000;
/// Tokens held back from the prompt for the response.
pub const PROMPT_HEADROOM: usize = 50;
/// Raw capacity of the generated text buffer, in bytes.
pub const RAW_TEXT_CAPACITY: usize = 8192;
/// Bytes of the raw capacity that appends may never use.
pub const RAW_TEXT_RESERVE: usize = 2;
/// Seed of the final sampling draw.
pub const SAMPLING_SEED: u64 = 42;
/// Runtime worker threads.
pub const RUNTIME_THREADS: usize = 2;

/// Limits applied to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_model_bytes: u64,
    pub prompt_headroom: usize,
    /// A prompt using more than this share of its capacity is refused.
    pub near_full_ratio: f64,
    pub raw_text_capacity: usize,
    pub raw_text_reserve: usize,
    /// Output length (bytes) before any early-stop heuristic applies.
    pub heuristic_min_len: usize,
    /// Share of the token budget after which drift stops generation.
    pub drift_ratio: f64,
    pub sampling_seed: u64,
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_model_bytes: MIN_MODEL_BYTES,
            prompt_headroom: PROMPT_HEADROOM,
            near_full_ratio: 0.9,
            raw_text_capacity: RAW_TEXT_CAPACITY,
            raw_text_reserve: RAW_TEXT_RESERVE,
            heuristic_min_len: 50,
            drift_ratio: 0.8,
            sampling_seed: SAMPLING_SEED,
            threads: RUNTIME_THREADS,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.threads > 0, "threads must be at least 1");
        anyhow::ensure!(
            self.raw_text_reserve < self.raw_text_capacity,
            "raw_text_reserve ({}) must be below raw_text_capacity ({})",
            self.raw_text_reserve,
            self.raw_text_capacity
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.near_full_ratio),
            "near_full_ratio must be within 0..=1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.drift_ratio),
            "drift_ratio must be within 0..=1"
        );
        Ok(())
    }
}
