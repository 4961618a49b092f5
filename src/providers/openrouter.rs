//! OpenRouter chat completions stream adapter.
//!
//! Data-only SSE in the OpenAI chat-completions shape, terminated by
//! `[DONE]`. Reasoning arrives either as a plain `reasoning` string or as
//! structured `reasoning_details`; the structured form wins when present.
//! See: <https://openrouter.ai/docs/api-reference/streaming>

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::builder::ResponseHooks;
use crate::client::{unexpected_message, ClientError, Provider};
use crate::context::MergePolicy;
use crate::model::{
    FinishReason, ReasoningProvider, StreamChunk, StreamMeta, ThinkingMetadata, ToolArguments,
    Usage,
};
use crate::providers::ProviderId;
use crate::stream::{Framing, WireMessage};

/// OpenRouter chat completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRouter;

impl Provider for OpenRouter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn classify(&self, message: &WireMessage, _model: &str) -> Result<Vec<StreamChunk>, ClientError> {
        let WireMessage::Event(event) = message else {
            return Err(unexpected_message(self.id(), message));
        };
        if event.is_done() {
            return Ok(Vec::new());
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(&event.data)?;
        Ok(chunk.into_chunks())
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default().with_finish_reason_correction()
    }
}

impl ChatCompletionChunk {
    fn into_chunks(self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        let mut finish_reason = None;

        for choice in self.choices {
            let delta = choice.delta;

            match delta.reasoning_details {
                Some(details) if !details.is_empty() => {
                    chunks.extend(details.into_iter().filter_map(ReasoningDetailDelta::into_chunk));
                }
                _ => {
                    if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                        chunks.push(StreamChunk::thinking(
                            reasoning,
                            ThinkingMetadata::new(ReasoningProvider::Openrouter, "openrouter"),
                        ));
                    }
                }
            }

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                chunks.push(StreamChunk::text(content));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                chunks.push(StreamChunk::tool_call(
                    call.id.unwrap_or_default(),
                    function.name.unwrap_or_default(),
                    ToolArguments::Partial(function.arguments.unwrap_or_default()),
                    call.index,
                ));
            }

            if let Some(reason) = choice.finish_reason {
                finish_reason = Some(FinishReason::from(reason));
            }
        }

        if let Some(usage) = self.usage {
            chunks.push(StreamChunk::Usage(usage.into()));
        }

        if let Some(error) = self.error {
            let mut meta = StreamMeta::error(error.message);
            meta.response_id = self.id;
            meta.model = self.model;
            if let Some(code) = error.code {
                meta.provider_meta.insert("error_code".to_string(), code);
            }
            chunks.push(StreamChunk::Meta(meta));
        } else if finish_reason.is_some() {
            chunks.push(StreamChunk::Meta(StreamMeta {
                finish_reason,
                response_id: self.id,
                model: self.model,
                ..StreamMeta::default()
            }));
        }

        chunks
    }
}

impl ReasoningDetailDelta {
    fn into_chunk(self) -> Option<StreamChunk> {
        let (text, metadata) = match self {
            ReasoningDetailDelta::Text {
                text,
                signature,
                format,
            } => {
                let mut metadata = ThinkingMetadata::new(
                    ReasoningProvider::Openrouter,
                    format.unwrap_or_else(|| "openrouter".to_string()),
                );
                metadata.signature = signature;
                (text.unwrap_or_default(), metadata)
            }
            ReasoningDetailDelta::Summary { summary, format } => (
                summary,
                ThinkingMetadata::new(
                    ReasoningProvider::Openrouter,
                    format.unwrap_or_else(|| "openrouter".to_string()),
                )
                .with_provider_data("type", Value::String("reasoning.summary".to_string())),
            ),
            ReasoningDetailDelta::Encrypted { data, format } => (
                String::new(),
                ThinkingMetadata::new(
                    ReasoningProvider::Openrouter,
                    format.unwrap_or_else(|| "openrouter".to_string()),
                )
                .with_signature(data)
                .encrypted(),
            ),
            ReasoningDetailDelta::Other => return None,
        };

        Some(StreamChunk::thinking(text, metadata))
    }
}

// --- Chat completions stream types ---

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChatUsage>,
    error: Option<ChatError>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<ChatFinishReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_details: Option<Vec<ReasoningDetailDelta>>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ReasoningDetailDelta {
    #[serde(rename = "reasoning.text")]
    Text {
        text: Option<String>,
        signature: Option<String>,
        format: Option<String>,
    },
    #[serde(rename = "reasoning.summary")]
    Summary {
        summary: String,
        format: Option<String>,
    },
    #[serde(rename = "reasoning.encrypted")]
    Encrypted {
        data: String,
        format: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ChatFinishReason {
    Stop,
    Length,
    ToolCalls,
    FunctionCall,
    ContentFilter,
    Error,
    #[serde(other)]
    Other,
}

impl From<ChatFinishReason> for FinishReason {
    fn from(reason: ChatFinishReason) -> Self {
        match reason {
            ChatFinishReason::Stop | ChatFinishReason::Other => FinishReason::Stop,
            ChatFinishReason::Length => FinishReason::Length,
            ChatFinishReason::ToolCalls | ChatFinishReason::FunctionCall => FinishReason::ToolCalls,
            ChatFinishReason::ContentFilter => FinishReason::ContentFilter,
            ChatFinishReason::Error => FinishReason::Error,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
    prompt_tokens_details: Option<PromptTokensDetails>,
    completion_tokens_details: Option<CompletionTokensDetails>,
    cost: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u32>,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        let mut extra = Map::new();
        if let Some(cost) = u.cost {
            extra.insert("cost".to_string(), cost);
        }

        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            reasoning_tokens: u.completion_tokens_details.and_then(|d| d.reasoning_tokens),
            cached_tokens: u.prompt_tokens_details.and_then(|d| d.cached_tokens),
            total_tokens: u.total_tokens,
            extra,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatError {
    message: String,
    code: Option<Value>,
}
