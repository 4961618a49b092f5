//! Ollama `/api/chat` stream adapter.
//!
//! One JSON object per line. Tool calls arrive whole with parsed arguments,
//! and the final line has `"done": true` plus the token counters.
//! See: <https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion>

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::builder::ResponseHooks;
use crate::client::{unexpected_message, ClientError, Provider};
use crate::context::MergePolicy;
use crate::model::{
    FinishReason, ReasoningProvider, StreamChunk, StreamMeta, ThinkingMetadata, ToolArguments,
    Usage,
};
use crate::providers::ProviderId;
use crate::stream::{Framing, WireMessage};

/// Ollama chat API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ollama;

impl Provider for Ollama {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn framing(&self) -> Framing {
        Framing::Ndjson
    }

    fn classify(&self, message: &WireMessage, _model: &str) -> Result<Vec<StreamChunk>, ClientError> {
        let WireMessage::Line(line) = message else {
            return Err(unexpected_message(self.id(), message));
        };

        let chunk: OllamaChunk = serde_json::from_str(line)?;
        Ok(chunk.into_chunks())
    }

    fn is_terminal(&self, message: &WireMessage) -> bool {
        #[derive(Deserialize)]
        struct Done {
            #[serde(default)]
            done: bool,
        }

        match message {
            WireMessage::Line(line) => serde_json::from_str::<Done>(line).is_ok_and(|d| d.done),
            _ => false,
        }
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default().with_finish_reason_correction()
    }
}

impl OllamaChunk {
    fn into_chunks(self) -> Vec<StreamChunk> {
        if let Some(error) = self.error {
            return vec![StreamChunk::Meta(StreamMeta {
                model: self.model,
                ..StreamMeta::error(error)
            })];
        }

        let mut chunks = Vec::new();

        if let Some(message) = self.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                chunks.push(StreamChunk::thinking(
                    thinking,
                    ThinkingMetadata::new(ReasoningProvider::Ollama, "ollama"),
                ));
            }
            if !message.content.is_empty() {
                chunks.push(StreamChunk::text(message.content));
            }
            for (position, call) in message.tool_calls.into_iter().enumerate() {
                let arguments = match call.function.arguments {
                    Value::Object(map) => ToolArguments::Complete(map),
                    Value::Null => ToolArguments::Complete(Map::new()),
                    Value::String(text) => ToolArguments::Partial(text),
                    other => ToolArguments::Partial(other.to_string()),
                };
                chunks.push(StreamChunk::tool_call(
                    call.id.unwrap_or_default(),
                    call.function.name,
                    arguments,
                    call.function.index.unwrap_or(position),
                ));
            }
        }

        if self.done {
            if self.prompt_eval_count.is_some() || self.eval_count.is_some() {
                let total = match (self.prompt_eval_count, self.eval_count) {
                    (Some(input), Some(output)) => Some(input.saturating_add(output)),
                    _ => None,
                };
                chunks.push(StreamChunk::Usage(Usage {
                    input_tokens: self.prompt_eval_count,
                    output_tokens: self.eval_count,
                    total_tokens: total,
                    ..Usage::default()
                }));
            }

            let mut provider_meta = Map::new();
            for (key, value) in [
                ("total_duration", self.total_duration),
                ("load_duration", self.load_duration),
                ("eval_duration", self.eval_duration),
            ] {
                if let Some(nanos) = value {
                    provider_meta.insert(key.to_string(), json!(nanos));
                }
            }

            chunks.push(StreamChunk::Meta(StreamMeta {
                finish_reason: Some(
                    self.done_reason
                        .map(FinishReason::from)
                        .unwrap_or(FinishReason::Stop),
                ),
                model: self.model,
                provider_meta,
                ..StreamMeta::default()
            }));
        }

        chunks
    }
}

// --- Ollama chat stream types ---

#[derive(Debug, Clone, Deserialize)]
struct OllamaChunk {
    model: Option<String>,
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<DoneReason>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    total_duration: Option<u64>,
    load_duration: Option<u64>,
    eval_duration: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaToolCall {
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaFunction {
    name: String,
    index: Option<usize>,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DoneReason {
    Stop,
    Length,
    #[serde(other)]
    Other,
}

impl From<DoneReason> for FinishReason {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Length => FinishReason::Length,
            DoneReason::Stop | DoneReason::Other => FinishReason::Stop,
        }
    }
}
