//! Chat prompt formatting.
//!
//! The pipeline consumes a fully formatted prompt. These helpers build one
//! from a stateless history slice owned by the caller.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tokens set aside for the current message and the response.
const RESERVED_TOKENS: usize = 150;
/// Conservative characters-per-token estimate.
const CHARS_PER_TOKEN: usize = 3;
/// Per-message allowance for role labels and delimiters.
const MESSAGE_OVERHEAD: usize = 20;
/// Most history messages ever kept.
const MAX_HISTORY_MESSAGES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Turn layout expected by a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptFormat {
    Phi3,
    ChatMl,
    Alpaca,
    Llama2,
    Llama3,
    Mistral,
}

impl PromptFormat {
    pub const ALL: [PromptFormat; 6] = [
        Self::Phi3,
        Self::ChatMl,
        Self::Alpaca,
        Self::Llama2,
        Self::Llama3,
        Self::Mistral,
    ];

    /// Guess the layout from the model file name; ChatML when unsure.
    pub fn for_model(model_path: &Path) -> Self {
        let name = model_path.to_string_lossy().to_lowercase();
        if name.contains("phi-3") {
            Self::Phi3
        } else if name.contains("llama-3") || name.contains("llama3") {
            Self::Llama3
        } else if name.contains("llama-2") || name.contains("llama2") {
            Self::Llama2
        } else if name.contains("mistral") {
            Self::Mistral
        } else {
            Self::ChatMl
        }
    }

    /// Format `message` as the next user turn after `history`, ending where
    /// the assistant's reply begins.
    pub fn build(self, system: &str, history: &[ChatMessage], message: &str) -> String {
        let mut p = String::new();
        match self {
            Self::Phi3 => {
                if !system.is_empty() {
                    p.push_str(system);
                    p.push_str("\n\n");
                }
                for m in history {
                    let label = match m.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                    };
                    p.push_str(&format!("{label}: {}\n", m.content));
                }
                p.push_str(&format!("User: {message}\nAssistant:"));
            }
            Self::ChatMl => {
                if !system.is_empty() {
                    p.push_str(&format!("<|im_start|>system\n{system}<|im_end|>\n"));
                }
                for m in history {
                    let role = match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    };
                    p.push_str(&format!("<|im_start|>{role}\n{}<|im_end|>\n", m.content));
                }
                p.push_str(&format!(
                    "<|im_start|>user\n{message}<|im_end|>\n<|im_start|>assistant\n"
                ));
            }
            Self::Alpaca => {
                let instruction = if history.is_empty() {
                    message.to_string()
                } else {
                    let turns: Vec<String> = history
                        .iter()
                        .map(|m| {
                            let label = match m.role {
                                Role::User => "Human",
                                Role::Assistant => "Assistant",
                            };
                            format!("{label}: {}", m.content)
                        })
                        .collect();
                    format!(
                        "Previous conversation:\n{}\n\nCurrent question: {message}",
                        turns.join("\n")
                    )
                };
                p.push_str(&format!("### Instruction:\n{instruction}\n\n### Response:\n"));
            }
            Self::Llama2 => {
                p.push_str(&format!("<s>[INST] <<SYS>>\n{system}\n<</SYS>>\n\n"));
                push_inst_history(&mut p, history);
                p.push_str(&format!("{message} [/INST] "));
            }
            Self::Llama3 => {
                p.push_str(&format!(
                    "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system}<|eot_id|>"
                ));
                for m in history {
                    let role = match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    };
                    p.push_str(&format!(
                        "<|start_header_id|>{role}<|end_header_id|>\n\n{}<|eot_id|>",
                        m.content
                    ));
                }
                p.push_str(&format!(
                    "<|start_header_id|>user<|end_header_id|>\n\n{message}<|eot_id|>\
                     <|start_header_id|>assistant<|end_header_id|>\n\n"
                ));
            }
            Self::Mistral => {
                p.push_str("<s>[INST]");
                if !system.is_empty() {
                    p.push_str(&format!(" {system}\n\n"));
                } else {
                    p.push(' ');
                }
                push_inst_history(&mut p, history);
                p.push_str(&format!("{message} [/INST]"));
            }
        }
        p
    }

    /// Text that means the model has started another turn of this layout.
    pub fn stop_strings(self) -> &'static [&'static str] {
        match self {
            Self::Phi3 => &["User:", "Assistant:", "\n\n", "Human:", "<|end|>"],
            Self::ChatMl => &["<|im_end|>", "<|im_start|>", "user\n", "assistant\n", "system\n"],
            Self::Alpaca => &["### Instruction:", "### Response:"],
            Self::Llama2 | Self::Mistral => &["[/INST]", "</s>", "<s>", "[INST]"],
            Self::Llama3 => &[
                "<|eot_id|>",
                "<|start_header_id|>",
                "<|end_header_id|>",
                "<|begin_of_text|>",
            ],
        }
    }

    /// Cut `response` at the first stop string, then drop blank lines and
    /// lines repeating the one before.
    pub fn clean(self, response: &str) -> String {
        let end = self
            .stop_strings()
            .iter()
            .filter_map(|s| response.find(s))
            .min()
            .unwrap_or(response.len());

        let mut lines: Vec<&str> = Vec::new();
        let mut last = "";
        for line in response[..end].lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && trimmed != last {
                lines.push(line);
                last = trimmed;
            }
        }
        lines.join("\n").trim().to_string()
    }
}

fn push_inst_history(p: &mut String, history: &[ChatMessage]) {
    for m in history {
        match m.role {
            Role::User => p.push_str(&format!("{} [/INST] ", m.content)),
            Role::Assistant => p.push_str(&format!("{} </s><s>[INST] ", m.content)),
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Phi3 => "phi3",
            Self::ChatMl => "chatml",
            Self::Alpaca => "alpaca",
            Self::Llama2 => "llama2",
            Self::Llama3 => "llama3",
            Self::Mistral => "mistral",
        })
    }
}

impl FromStr for PromptFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown prompt format '{s}'"))
    }
}

/// Keep the most recent history that fits a context of `context_tokens`.
///
/// `history` excludes the message being asked now. Messages are kept
/// newest-first while their estimated size fits, and never more than six.
pub fn truncate_history(history: &[ChatMessage], context_tokens: usize) -> Vec<ChatMessage> {
    let max_chars = context_tokens.saturating_sub(RESERVED_TOKENS) * CHARS_PER_TOKEN;

    let mut total = 0usize;
    let mut kept = 0usize;
    for m in history.iter().rev() {
        let size = m.content.chars().count() + MESSAGE_OVERHEAD;
        if total + size > max_chars {
            break;
        }
        total += size;
        kept += 1;
    }

    let kept = kept.min(MAX_HISTORY_MESSAGES);
    history[history.len() - kept..].to_vec()
}
