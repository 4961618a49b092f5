//! LLM provider implementations.
//!
//! Each vendor is a stateless unit struct implementing [`Provider`]. The
//! registry maps a [`ProviderId`] to its adapter once, before decoding starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::{ClientError, Provider};

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod openrouter;

// Re-export for convenience
pub use anthropic::Anthropic;
pub use bedrock::Bedrock;
pub use gemini::Gemini;
pub use ollama::Ollama;
pub use openai::OpenAi;
pub use openrouter::OpenRouter;

/// Registry key of a supported vendor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Anthropic,
    Gemini,
    Bedrock,
    Ollama,
}

impl ProviderId {
    /// Every registered vendor.
    pub const ALL: [ProviderId; 6] = [
        ProviderId::OpenAi,
        ProviderId::OpenRouter,
        ProviderId::Anthropic,
        ProviderId::Gemini,
        ProviderId::Bedrock,
        ProviderId::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
            ProviderId::Bedrock => "bedrock",
            ProviderId::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ClientError::UnknownProvider(s.to_string()))
    }
}

/// Look up the adapter for a vendor.
pub fn lookup(id: ProviderId) -> &'static dyn Provider {
    match id {
        ProviderId::OpenAi => &OpenAi,
        ProviderId::OpenRouter => &OpenRouter,
        ProviderId::Anthropic => &Anthropic,
        ProviderId::Gemini => &Gemini,
        ProviderId::Bedrock => &Bedrock,
        ProviderId::Ollama => &Ollama,
    }
}

/// Look up an adapter by its registry name.
pub fn by_name(name: &str) -> Result<&'static dyn Provider, ClientError> {
    name.parse().map(lookup)
}
