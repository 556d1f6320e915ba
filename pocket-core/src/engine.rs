//! Generation engine: drives tokenize, prompt decode and the
//! sample/decode loop against an [`InferenceBackend`].

use std::fmt;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::GenerateError;
use crate::profile::{GenerationProfile, ModelFamily};
use crate::runtime::{
    ContextHandle, ContextParams, InferenceBackend, ModelHandle, ModelParams, Vocabulary,
};
use crate::sampling::SamplerChain;
use crate::sanitize::contains_control_marker;

/// Piece patterns that close a sentence.
const SENTENCE_ENDINGS: [&str; 7] = [". ", ".\n", "! ", "?\n", ".\"", "!\"", "?\""];
/// Piece patterns that signal repetition or drift late in a response.
const DRIFT_PATTERNS: [&str; 2] = ["\n\n", "  "];

/// Growable text with a hard ceiling; appends past it are refused whole.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    text: String,
    ceiling: usize,
}

impl GeneratedText {
    /// `reserve` bytes of `capacity` are never handed out.
    pub fn new(capacity: usize, reserve: usize) -> Self {
        Self {
            text: String::new(),
            ceiling: capacity.saturating_sub(reserve),
        }
    }

    /// Append `piece` if the result stays strictly under the ceiling.
    pub fn try_append(&mut self, piece: &str) -> bool {
        if self.text.len() + piece.len() < self.ceiling {
            self.text.push_str(piece);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Prompt tokens checked against the prompt capacity of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    tokens: Vec<u32>,
    capacity: usize,
}

impl TokenSequence {
    pub fn bounded(
        tokens: Vec<u32>,
        capacity: usize,
        near_full_ratio: f64,
    ) -> Result<Self, GenerateError> {
        let n = tokens.len();
        if n > capacity {
            return Err(GenerateError::TokenizationOverflow {
                tokens: n,
                capacity,
            });
        }
        if n as f64 > capacity as f64 * near_full_ratio {
            return Err(GenerateError::ContextNearFull {
                tokens: n,
                capacity,
            });
        }
        Ok(Self { tokens, capacity })
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Why the decode loop ended. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfGeneration,
    TokenBudget,
    ControlMarker,
    BufferFull,
    SentenceBoundary,
    Drift,
    SampleFailed,
    PieceFailed,
    DecodeFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EndOfGeneration => "end-of-generation",
            Self::TokenBudget => "token-budget",
            Self::ControlMarker => "control-marker",
            Self::BufferFull => "buffer-full",
            Self::SentenceBoundary => "sentence-boundary",
            Self::Drift => "drift",
            Self::SampleFailed => "sample-failed",
            Self::PieceFailed => "piece-failed",
            Self::DecodeFailed => "decode-failed",
        };
        f.write_str(s)
    }
}

/// Raw result of one generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: GeneratedText,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop: StopReason,
}

/// Runs one request against a runtime under a fixed profile.
pub struct GenerationEngine<'a> {
    config: &'a PipelineConfig,
    family: ModelFamily,
    profile: GenerationProfile,
}

impl<'a> GenerationEngine<'a> {
    pub fn new(config: &'a PipelineConfig, family: ModelFamily) -> Self {
        Self {
            config,
            family,
            profile: family.profile(),
        }
    }

    pub fn profile(&self) -> &GenerationProfile {
        &self.profile
    }

    /// Tokens available to the prompt once the response and headroom are
    /// set aside.
    pub fn prompt_capacity(&self) -> usize {
        self.profile
            .context_size
            .saturating_sub(self.profile.max_tokens + self.config.prompt_headroom)
    }

    /// Generate raw text for `prompt`.
    ///
    /// Takes ownership of the backend; it and every handle acquired from it
    /// are released before this returns, whichever way it returns.
    pub fn run<B: InferenceBackend>(
        &self,
        backend: B,
        model_path: &Path,
        prompt: &str,
    ) -> Result<GenerationOutcome, GenerateError> {
        let mut model = backend
            .load_model(model_path, &ModelParams::cpu_only())
            .map_err(GenerateError::ModelLoadFailure)?;

        let mut ctx = model
            .new_context(&ContextParams {
                context_size: self.profile.context_size,
                batch_size: self.profile.batch_size,
                threads: self.config.threads,
            })
            .map_err(GenerateError::ContextInitFailure)?;

        let mut vocab = model.vocab().map_err(GenerateError::VocabFailure)?;

        let tokens = vocab
            .tokenize(prompt, true)
            .map_err(GenerateError::PromptProcessingFailure)?;
        let tokens =
            TokenSequence::bounded(tokens, self.prompt_capacity(), self.config.near_full_ratio)?;
        tracing::debug!(
            prompt_tokens = tokens.len(),
            capacity = tokens.capacity(),
            "prompt tokenized"
        );

        ctx.decode(tokens.as_slice())
            .map_err(GenerateError::PromptProcessingFailure)?;

        let mut sampler = SamplerChain::from_profile(&self.profile, self.config.sampling_seed);
        let (text, generated_tokens, stop) =
            self.decode_loop(&mut ctx, &mut vocab, &mut sampler);

        tracing::info!(
            family = %self.family,
            prompt_tokens = tokens.len(),
            generated_tokens,
            bytes = text.len(),
            stop = %stop,
            "generation finished"
        );

        Ok(GenerationOutcome {
            text,
            prompt_tokens: tokens.len(),
            generated_tokens,
            stop,
        })
    }

    fn decode_loop<C, V>(
        &self,
        ctx: &mut C,
        vocab: &mut V,
        sampler: &mut SamplerChain,
    ) -> (GeneratedText, usize, StopReason)
    where
        C: ContextHandle,
        V: Vocabulary,
    {
        let max_tokens = self.profile.max_tokens;
        let min_tokens = self.family.sentence_stop_min_tokens();
        let drift_after = max_tokens as f64 * self.config.drift_ratio;

        let mut text =
            GeneratedText::new(self.config.raw_text_capacity, self.config.raw_text_reserve);
        let mut generated = 0usize;

        let stop = loop {
            if generated >= max_tokens {
                break StopReason::TokenBudget;
            }

            let token = match ctx.logits().and_then(|logits| sampler.sample(&logits)) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "sampling failed");
                    break StopReason::SampleFailed;
                }
            };
            if vocab.is_eog(token) {
                break StopReason::EndOfGeneration;
            }

            let piece = match vocab.token_to_piece(token) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(token, error = %e, "token has no text");
                    break StopReason::PieceFailed;
                }
            };
            if contains_control_marker(&piece) {
                break StopReason::ControlMarker;
            }
            if !text.try_append(&piece) {
                break StopReason::BufferFull;
            }

            if let Err(e) = ctx.decode(&[token]) {
                tracing::warn!(token, error = %e, "decode failed");
                break StopReason::DecodeFailed;
            }
            generated += 1;

            if text.len() > self.config.heuristic_min_len {
                if generated > min_tokens && SENTENCE_ENDINGS.iter().any(|p| piece.contains(p)) {
                    break StopReason::SentenceBoundary;
                }
                if generated as f64 > drift_after && DRIFT_PATTERNS.iter().any(|p| piece.contains(p))
                {
                    break StopReason::Drift;
                }
            }
        };

        (text, generated, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::scripted::{Script, ScriptedBackend};

    type RunResult = (Result<GenerationOutcome, GenerateError>, Vec<String>);

    fn run(script: Script, family: ModelFamily, prompt: &str) -> RunResult {
        run_with(script, family, prompt, &PipelineConfig::default())
    }

    fn run_with(
        script: Script,
        family: ModelFamily,
        prompt: &str,
        config: &PipelineConfig,
    ) -> RunResult {
        let (backend, log) = ScriptedBackend::new(script);
        let engine = GenerationEngine::new(config, family);
        let result = engine.run(backend, Path::new("model.gguf"), prompt);
        let events = log.borrow().clone();
        (result, events)
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn assert_all_released(events: &[String]) {
        for handle in ["context", "model", "backend"] {
            let acquired = events.iter().any(|e| match handle {
                "context" => e.starts_with("context "),
                "model" => e == "model loaded",
                _ => e == "backend init",
            });
            let released = events.iter().any(|e| e == &format!("{handle} released"));
            assert_eq!(acquired, released, "{handle}: {events:?}");
        }
        assert_eq!(events.last().map(String::as_str), Some("backend released"));
    }

    #[test]
    fn prompt_capacity_per_family() {
        let config = PipelineConfig::default();
        assert_eq!(GenerationEngine::new(&config, ModelFamily::General).prompt_capacity(), 156);
        assert_eq!(
            GenerationEngine::new(&config, ModelFamily::CompactInstruct).prompt_capacity(),
            176
        );
    }

    #[test]
    fn generates_until_end_of_generation() {
        let script = Script::with_pieces(["Hello", " world"]);
        let (result, events) = run(script, ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.text.as_str(), "Hello world");
        assert_eq!(out.generated_tokens, 2);
        assert_eq!(out.prompt_tokens, 2);
        assert_eq!(out.stop, StopReason::EndOfGeneration);
        assert!(events.iter().any(|e| e == "context 256x32 threads=2"));
        assert_all_released(&events);
    }

    #[test]
    fn control_marker_stops_without_append() {
        let script = Script::with_pieces(["Sure", "<|user|>", "never"]);
        let (result, _) = run(script, ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.text.as_str(), "Sure");
        assert_eq!(out.stop, StopReason::ControlMarker);
    }

    #[test]
    fn loop_ends_exactly_at_token_budget() {
        let script = Script::with_pieces(vec!["x"; 80]);
        let (result, _) = run(script, ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.generated_tokens, 50);
        assert_eq!(out.text.len(), 50);
        assert_eq!(out.stop, StopReason::TokenBudget);
    }

    #[test]
    fn sentence_boundary_after_minimum_tokens() {
        let mut pieces = vec!["abc "; 21];
        pieces.push("end. ");
        pieces.push("more");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::SentenceBoundary);
        assert_eq!(out.generated_tokens, 22);
        assert!(out.text.as_str().ends_with("end. "));
    }

    #[test]
    fn sentence_boundary_ignored_before_minimum_tokens() {
        // 20 tokens is not past the general minimum.
        let mut pieces = vec!["abcd "; 19];
        pieces.push("done. ");
        pieces.push("tail");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::EndOfGeneration);
        assert!(out.text.as_str().ends_with("tail"));
    }

    #[test]
    fn compact_family_never_stops_on_sentence_within_budget() {
        let mut pieces = vec!["abc. "; 40];
        pieces[0] = "start ";
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::CompactInstruct, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::TokenBudget);
        assert_eq!(out.generated_tokens, 30);
    }

    #[test]
    fn drift_late_in_budget_stops() {
        let mut pieces = vec!["ab"; 41];
        pieces.push("x\n\ny");
        pieces.push("zz");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::Drift);
        assert_eq!(out.generated_tokens, 42);
    }

    #[test]
    fn double_space_counts_as_drift() {
        let mut pieces = vec!["ab"; 41];
        pieces.push("x  y");
        pieces.push("zz");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::Drift);
        assert_eq!(out.generated_tokens, 42);
    }

    #[test]
    fn short_text_never_stops_early() {
        // 25 tokens, 27 bytes when the sentence ends: below the length gate.
        let mut pieces = vec!["x"; 25];
        pieces.push(". ");
        pieces.push("tail");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::EndOfGeneration);
        assert!(out.text.as_str().ends_with(". tail"));
    }

    #[test]
    fn length_gate_is_strictly_above_fifty_bytes() {
        // Exactly 50 bytes when ". " lands: no stop.
        let mut pieces = vec!["xx"; 24];
        pieces.push(". ");
        pieces.push("end");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::EndOfGeneration);
        assert_eq!(out.text.len(), 53);

        // 51 bytes: stop.
        let mut pieces = vec!["xx"; 24];
        pieces.push("x");
        pieces.push(". ");
        pieces.push("end");
        let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::SentenceBoundary);
        assert_eq!(out.text.len(), 51);
    }

    #[test]
    fn quoted_and_question_endings_stop() {
        for ending in ["she said.\"", "really!\"", "why?\"", "why?\n"] {
            let mut pieces = vec!["abc "; 21];
            pieces.push(ending);
            pieces.push("more");
            let (result, _) = run(Script::with_pieces(pieces), ModelFamily::General, "hi");
            let out = result.unwrap();
            assert_eq!(out.stop, StopReason::SentenceBoundary, "{ending:?}");
            assert!(out.text.as_str().ends_with(ending));
        }
    }

    #[test]
    fn buffer_ceiling_refuses_whole_piece() {
        let config = PipelineConfig {
            raw_text_capacity: 16,
            raw_text_reserve: 2,
            ..Default::default()
        };
        let (result, _) = run_with(
            Script::with_pieces(vec!["abcd"; 10]),
            ModelFamily::General,
            "hi",
            &config,
        );
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::BufferFull);
        assert_eq!(out.text.as_str(), "abcdabcdabcd");
        assert!(out.text.len() <= config.raw_text_capacity);
    }

    #[test]
    fn decode_failure_keeps_partial_text() {
        let script = Script {
            fail_decode_at: Some(1),
            ..Script::with_pieces(["one", " two", " three"])
        };
        let (result, events) = run(script, ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::DecodeFailed);
        assert_eq!(out.text.as_str(), "one two");
        assert_eq!(out.generated_tokens, 1);
        assert_all_released(&events);
    }

    #[test]
    fn piece_failure_keeps_partial_text() {
        let script = Script {
            bad_piece_at: Some(1),
            ..Script::with_pieces(["one", " two"])
        };
        let (result, _) = run(script, ModelFamily::General, "hi");
        let out = result.unwrap();
        assert_eq!(out.stop, StopReason::PieceFailed);
        assert_eq!(out.text.as_str(), "one");
    }

    #[test]
    fn near_full_prompt_is_refused_before_decode() {
        // BOS + 140 words = 141 tokens > 0.9 * 156.
        let (result, events) = run(Script::with_pieces(["x"]), ModelFamily::General, &words(140));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ContextNearFull);
        assert!(!events.iter().any(|e| e.starts_with("prompt decoded")));
        assert_all_released(&events);
    }

    #[test]
    fn prompt_just_under_near_full_is_decoded() {
        let (result, events) = run(Script::with_pieces(["ok"]), ModelFamily::General, &words(139));
        assert!(result.is_ok());
        assert!(events.iter().any(|e| e == "prompt decoded (140 tokens)"));
    }

    #[test]
    fn oversized_prompt_overflows() {
        let (result, events) = run(Script::default(), ModelFamily::General, &words(200));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::TokenizationOverflow);
        assert_all_released(&events);
    }

    #[test]
    fn runtime_failures_map_to_their_kind_and_release() {
        let cases = [
            (Script { fail_load: true, ..Default::default() }, ErrorKind::ModelLoadFailure),
            (Script { fail_context: true, ..Default::default() }, ErrorKind::ContextInitFailure),
            (Script { fail_vocab: true, ..Default::default() }, ErrorKind::VocabFailure),
            (
                Script { fail_prompt_decode: true, ..Default::default() },
                ErrorKind::PromptProcessingFailure,
            ),
        ];
        for (script, kind) in cases {
            let (result, events) = run(script, ModelFamily::General, "hi");
            assert_eq!(result.unwrap_err().kind(), kind);
            assert_all_released(&events);
        }
    }

    #[test]
    fn handles_release_in_reverse_order() {
        let (_, events) = run(Script::with_pieces(["a"]), ModelFamily::General, "hi");
        let released: Vec<&str> = events
            .iter()
            .filter(|e| e.ends_with("released"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            released,
            ["vocab released", "context released", "model released", "backend released"]
        );
    }

    #[test]
    fn generated_text_ceiling_is_strict() {
        let mut t = GeneratedText::new(8, 2);
        assert!(t.try_append("abcde"));
        assert!(!t.try_append("f"));
        assert_eq!(t.as_str(), "abcde");
    }
}
