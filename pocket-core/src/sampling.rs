//! Sampler chain: top-k, top-p, temperature, then a seeded draw.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::profile::GenerationProfile;

/// Draws one token per call from a logits row.
///
/// The random source is seeded, so identical logits sequences always yield
/// identical tokens.
pub struct SamplerChain {
    top_k: usize,
    top_p: f32,
    temperature: f32,
    rng: StdRng,
}

impl SamplerChain {
    pub fn new(top_k: usize, top_p: f32, temperature: f32, seed: u64) -> Self {
        Self {
            top_k,
            top_p,
            temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_profile(profile: &GenerationProfile, seed: u64) -> Self {
        Self::new(profile.top_k, profile.top_p, profile.temperature, seed)
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        if logits.is_empty() {
            bail!("empty logits");
        }

        let mut candidates: Vec<(usize, f32)> = logits.iter().copied().enumerate().collect();
        candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));

        // --- Top-k ---
        if self.top_k > 0 && self.top_k < candidates.len() {
            candidates.truncate(self.top_k);
        }

        // --- Top-p over the unscaled distribution, keeping at least one ---
        if self.top_p < 1.0 {
            let probs = softmax(&candidates);
            let mut cumsum = 0.0f32;
            let mut cutoff = candidates.len();
            for (i, p) in probs.iter().enumerate() {
                cumsum += p;
                if cumsum >= self.top_p {
                    cutoff = i + 1;
                    break;
                }
            }
            candidates.truncate(cutoff);
        }

        // --- Temperature ---
        if self.temperature <= 0.0 {
            return Ok(candidates[0].0 as u32);
        }
        let inv_temp = 1.0 / self.temperature;
        for (_, l) in candidates.iter_mut() {
            *l *= inv_temp;
        }

        // --- Seeded draw ---
        let probs = softmax(&candidates);
        let total: f32 = probs.iter().sum();
        let r = self.rng.gen::<f32>() * total;
        let mut acc = 0.0f32;
        for (&(idx, _), p) in candidates.iter().zip(&probs) {
            acc += p;
            if acc >= r {
                return Ok(idx as u32);
            }
        }

        Ok(candidates.last().map_or(0, |(idx, _)| *idx as u32))
    }
}

/// Probabilities of `candidates`, which must be sorted descending.
fn softmax(candidates: &[(usize, f32)]) -> Vec<f32> {
    let max = candidates[0].1;
    let mut probs: Vec<f32> = candidates.iter().map(|&(_, l)| (l - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
    probs
}
