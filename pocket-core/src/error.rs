//! Pipeline error taxonomy.
//!
//! Every variant is terminal for the request. The user-facing text lives on
//! [`ErrorKind`] so callers can match on the kind and still render the
//! fixed message the application shows.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single generation request.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("model file not found at {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file is {size} bytes, below the {minimum} byte minimum")]
    TooSmall { size: u64, minimum: u64 },

    #[error("model file header {header:02x?} is not GGUF")]
    InvalidFormat { header: Vec<u8> },

    #[error("runtime failed to load the model")]
    ModelLoadFailure(#[source] anyhow::Error),

    #[error("runtime failed to create an inference context")]
    ContextInitFailure(#[source] anyhow::Error),

    #[error("runtime failed to provide a vocabulary")]
    VocabFailure(#[source] anyhow::Error),

    #[error("prompt needs {tokens} tokens, capacity is {capacity}")]
    TokenizationOverflow { tokens: usize, capacity: usize },

    #[error("prompt uses {tokens} of {capacity} available tokens")]
    ContextNearFull { tokens: usize, capacity: usize },

    #[error("runtime failed to process the prompt")]
    PromptProcessingFailure(#[source] anyhow::Error),

    #[error("generated text is too short to present ({len} bytes)")]
    LowQualityResponse { len: usize },

    #[error("nothing was generated")]
    EmptyResponse,
}

/// Identity of a [`GenerateError`], decoupled from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    TooSmall,
    InvalidFormat,
    ModelLoadFailure,
    ContextInitFailure,
    VocabFailure,
    TokenizationOverflow,
    ContextNearFull,
    PromptProcessingFailure,
    LowQualityResponse,
    EmptyResponse,
}

impl ErrorKind {
    /// The fixed message shown to the user in place of generated text.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::NotFound => "Error: Model file not found. Please download the model first.",
            Self::TooSmall => {
                "Error: Model file appears to be corrupted or incomplete. Please re-download the model."
            }
            Self::InvalidFormat => {
                "Error: Invalid model file format. Please ensure you have downloaded a valid GGUF model file."
            }
            Self::ModelLoadFailure => {
                "Error: Failed to load model. The file may be corrupted or incompatible with this version of the app."
            }
            Self::ContextInitFailure => "Error: Failed to create context",
            Self::VocabFailure => "Error: Failed to get vocabulary",
            Self::TokenizationOverflow => {
                "Conversation too long. Please start a new chat to continue."
            }
            Self::ContextNearFull => {
                "Context nearly full. Please start a new conversation for better responses."
            }
            Self::PromptProcessingFailure => "Error: Failed to process prompt",
            Self::LowQualityResponse => {
                "I'm not sure how to respond to that. Could you rephrase your question?"
            }
            Self::EmptyResponse => "I'm having trouble generating a response right now.",
        }
    }
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TooSmall { .. } => ErrorKind::TooSmall,
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::ModelLoadFailure(_) => ErrorKind::ModelLoadFailure,
            Self::ContextInitFailure(_) => ErrorKind::ContextInitFailure,
            Self::VocabFailure(_) => ErrorKind::VocabFailure,
            Self::TokenizationOverflow { .. } => ErrorKind::TokenizationOverflow,
            Self::ContextNearFull { .. } => ErrorKind::ContextNearFull,
            Self::PromptProcessingFailure(_) => ErrorKind::PromptProcessingFailure,
            Self::LowQualityResponse { .. } => ErrorKind::LowQualityResponse,
            Self::EmptyResponse => ErrorKind::EmptyResponse,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}
