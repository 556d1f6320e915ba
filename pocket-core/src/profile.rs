//! Model family detection and the fixed generation profile of each family.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Decoding parameters for one request. Selected whole, never patched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    pub context_size: usize,
    pub batch_size: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub max_tokens: usize,
}

/// Model families with distinct decoding needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Small instruct models that drift quickly; decoded conservatively.
    CompactInstruct,
    General,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::CompactInstruct, ModelFamily::General];

    pub fn profile(self) -> GenerationProfile {
        match self {
            Self::CompactInstruct => GenerationProfile {
                context_size: 256,
                batch_size: 32,
                temperature: 0.1,
                top_k: 3,
                top_p: 0.2,
                max_tokens: 30,
            },
            Self::General => GenerationProfile {
                context_size: 256,
                batch_size: 32,
                temperature: 0.7,
                top_k: 40,
                top_p: 0.9,
                max_tokens: 50,
            },
        }
    }

    /// Tokens that must be generated before a sentence end may stop decoding.
    pub fn sentence_stop_min_tokens(self) -> usize {
        match self {
            Self::CompactInstruct => 30,
            Self::General => 20,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CompactInstruct => "compact-instruct",
            Self::General => "general",
        })
    }
}

struct FamilyRule {
    markers: &'static [&'static str],
    family: ModelFamily,
}

/// Ordered; the first rule with a marker in the lowercased path wins.
const FAMILY_RULES: &[FamilyRule] = &[FamilyRule {
    markers: &["phi-3", "tinyllama"],
    family: ModelFamily::CompactInstruct,
}];

/// Detect the family from a model path. Unknown names fall back to
/// [`ModelFamily::General`].
pub fn detect_family(model_path: &Path) -> ModelFamily {
    let name = model_path.to_string_lossy().to_lowercase();
    FAMILY_RULES
        .iter()
        .find(|rule| rule.markers.iter().any(|m| name.contains(m)))
        .map_or(ModelFamily::General, |rule| rule.family)
}

pub fn select_profile(model_path: &Path) -> GenerationProfile {
    detect_family(model_path).profile()
}
