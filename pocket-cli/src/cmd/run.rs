//! `pocket run`: generate one response and print it to stdout.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use pocket_core::sanitize::clean_response;
use pocket_core::{
    select_profile, truncate_history, ChatMessage, GenerationRequest, Pipeline, PipelineConfig,
    PromptFormat,
};

/// Build the prompt, run the pipeline and print the result.
///
/// Exits non-zero when the printed text is a failure message rather than a
/// response.
pub fn execute(
    config: PipelineConfig,
    model: &Path,
    message: &str,
    format: &str,
    system: &str,
    history: Option<&Path>,
) -> Result<ExitCode> {
    let (prompt, format) = build_prompt(model, message, format, system, history)?;
    tracing::debug!(bytes = prompt.len(), "prompt ready");

    let pipeline = Pipeline::new(config)?;
    let started = Instant::now();
    let result = pipeline.generate(&GenerationRequest::new(model, prompt));
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "request finished");

    // Keep only the model's own turn.
    let result = match format {
        Some(format) => result.and_then(|text| clean_response(&format.clean(&text))),
        None => result,
    };

    match result {
        Ok(text) => {
            println!("{text}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::warn!(kind = ?e.kind(), error = %e, "generation failed");
            println!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_prompt(
    model: &Path,
    message: &str,
    format: &str,
    system: &str,
    history: Option<&Path>,
) -> Result<(String, Option<PromptFormat>)> {
    let format = match format {
        "raw" => return Ok((message.to_string(), None)),
        "auto" => PromptFormat::for_model(model),
        name => name.parse::<PromptFormat>()?,
    };

    let history = match history {
        Some(path) => read_history(path)?,
        None => Vec::new(),
    };
    let kept = truncate_history(&history, select_profile(model).context_size);
    if kept.len() < history.len() {
        tracing::info!(dropped = history.len() - kept.len(), "older turns dropped to fit context");
    }

    tracing::debug!(%format, turns = kept.len(), "formatting prompt");
    Ok((format.build(system, &kept, message), Some(format)))
}

fn read_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid history {}", path.display()))
}
