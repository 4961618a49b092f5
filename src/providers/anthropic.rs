//! Anthropic Messages API stream adapter.
//!
//! Named SSE events; every content block is addressed by its `index`, so
//! `input_json_delta` fragments join their tool call by index alone.
//! See: <https://docs.anthropic.com/en/api/messages-streaming>

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

const THINKING_FORMAT: &str = "anthropic-claude-v1";

/// Anthropic Messages API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anthropic;

impl Provider for Anthropic {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn classify(&self, message: &WireMessage, _model: &str) -> Result<Vec<StreamChunk>, ClientError> {
        let WireMessage::Event(event) = message else {
            return Err(unexpected_message(self.id(), message));
        };

        let event: AnthropicStreamEvent = serde_json::from_str(&event.data)?;
        Ok(event.into_chunks())
    }

    fn is_terminal(&self, message: &WireMessage) -> bool {
        match message {
            WireMessage::Event(event) => match event.event.as_deref() {
                Some(name) => name == "message_stop",
                None => serde_json::from_str::<EventType>(&event.data)
                    .is_ok_and(|e| e.kind == "message_stop"),
            },
            _ => false,
        }
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default().with_content_guarantee()
    }
}

fn thinking_metadata(block_index: usize) -> ThinkingMetadata {
    ThinkingMetadata::new(ReasoningProvider::Anthropic, THINKING_FORMAT)
        .with_provider_data("block_index", json!(block_index))
}

impl AnthropicStreamEvent {
    fn into_chunks(self) -> Vec<StreamChunk> {
        match self {
            AnthropicStreamEvent::MessageStart { message } => {
                let mut chunks = vec![StreamChunk::Meta(StreamMeta {
                    response_id: Some(message.id),
                    model: Some(message.model),
                    ..StreamMeta::default()
                })];
                if let Some(usage) = message.usage {
                    chunks.push(StreamChunk::Usage(usage.into()));
                }
                chunks
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } if !text.is_empty() => vec![StreamChunk::text(text)],
                ContentBlock::ToolUse { id, name } => vec![StreamChunk::tool_call(
                    id,
                    name,
                    ToolArguments::empty(),
                    index,
                )],
                ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    vec![StreamChunk::thinking(thinking, thinking_metadata(index))]
                }
                ContentBlock::RedactedThinking { data } => vec![StreamChunk::thinking(
                    "",
                    thinking_metadata(index).with_signature(data).encrypted(),
                )],
                _ => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => vec![StreamChunk::text(text)],
                ContentDelta::InputJsonDelta { partial_json } => vec![StreamChunk::tool_call(
                    "",
                    "",
                    ToolArguments::Partial(partial_json),
                    index,
                )],
                ContentDelta::ThinkingDelta { thinking } => {
                    vec![StreamChunk::thinking(thinking, thinking_metadata(index))]
                }
                ContentDelta::SignatureDelta { signature } => vec![StreamChunk::thinking(
                    "",
                    thinking_metadata(index).with_signature(signature),
                )],
                ContentDelta::Other => Vec::new(),
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut chunks = Vec::new();
                if let Some(usage) = usage {
                    chunks.push(StreamChunk::Usage(usage.into()));
                }

                let mut meta = StreamMeta {
                    finish_reason: delta.stop_reason.map(FinishReason::from),
                    ..StreamMeta::default()
                };
                if let Some(sequence) = delta.stop_sequence {
                    meta.provider_meta
                        .insert("stop_sequence".to_string(), Value::String(sequence));
                }
                chunks.push(StreamChunk::Meta(meta));
                chunks
            }
            AnthropicStreamEvent::Error { error } => {
                let mut meta = StreamMeta::error(error.message);
                meta.provider_meta
                    .insert("error_type".to_string(), Value::String(error.kind));
                vec![StreamChunk::Meta(meta)]
            }
            AnthropicStreamEvent::Other => Vec::new(),
        }
    }
}

// --- Anthropic stream types ---

#[derive(Debug, Deserialize)]
struct EventType {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<AnthropicUsage>,
    },
    Error {
        error: AnthropicError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageStart {
    id: String,
    model: String,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking {
        data: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    ToolUse,
    Refusal,
    #[serde(other)]
    Other,
}

impl From<StopReason> for FinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence | StopReason::Other => FinishReason::Stop,
            StopReason::MaxTokens => FinishReason::Length,
            StopReason::ToolUse => FinishReason::ToolCalls,
            StopReason::Refusal => FinishReason::ContentFilter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        let mut extra = Map::new();
        if let Some(created) = u.cache_creation_input_tokens {
            extra.insert("cache_creation_input_tokens".to_string(), json!(created));
        }

        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            reasoning_tokens: None,
            cached_tokens: u.cache_read_input_tokens,
            total_tokens: None,
            extra,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseEvent;

    fn event(name: &str, data: Value) -> WireMessage {
        WireMessage::Event(SseEvent::named(name, data.to_string()))
    }

    fn classify(name: &str, data: Value) -> Vec<StreamChunk> {
        Anthropic.classify(&event(name, data), "claude").unwrap()
    }

    #[test]
    fn test_message_start() {
        let chunks = classify(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1",
                    "type": "message",
                    "role": "assistant",
                    "model": "claude-sonnet-4-5",
                    "content": [],
                    "usage": {"input_tokens": 25, "output_tokens": 1, "cache_read_input_tokens": 5}
                }
            }),
        );
        let [StreamChunk::Meta(meta), StreamChunk::Usage(usage)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(meta.response_id.as_deref(), Some("msg_1"));
        assert_eq!(meta.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(usage.input_tokens, Some(25));
        assert_eq!(usage.cached_tokens, Some(5));
    }

    #[test]
    fn test_tool_use_block() {
        let start = classify(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
            }),
        );
        assert_eq!(
            start,
            vec![StreamChunk::tool_call("toolu_1", "get_weather", ToolArguments::empty(), 1)]
        );

        let delta = classify(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"city\": \"Par"}
            }),
        );
        assert_eq!(
            delta,
            vec![StreamChunk::tool_call("", "", ToolArguments::Partial("{\"city\": \"Par".into()), 1)]
        );
    }

    #[test]
    fn test_thinking_and_signature() {
        let thinking = classify(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Let me"}}),
        );
        assert!(matches!(
            &thinking[..],
            [StreamChunk::Thinking { text, metadata }]
                if text == "Let me" && metadata.format == THINKING_FORMAT && metadata.provider_data["block_index"] == json!(0)
        ));

        let signature = classify(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQB"}}),
        );
        assert!(matches!(
            &signature[..],
            [StreamChunk::Thinking { text, metadata }]
                if text.is_empty() && metadata.signature.as_deref() == Some("EqQB")
        ));
    }

    #[test]
    fn test_message_delta() {
        let chunks = classify(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                "usage": {"output_tokens": 15}
            }),
        );
        let [StreamChunk::Usage(usage), StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(meta.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_error_event() {
        let chunks = classify(
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
        let [StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(meta.finish_reason, Some(FinishReason::Error));
        assert_eq!(meta.provider_meta["error_type"], json!("overloaded_error"));
    }

    #[test]
    fn test_ping_and_stop() {
        assert!(classify("ping", json!({"type": "ping"})).is_empty());

        let stop = event("message_stop", json!({"type": "message_stop"}));
        assert!(Anthropic.is_terminal(&stop));
        assert!(Anthropic.classify(&stop, "claude").unwrap().is_empty());
        assert!(!Anthropic.is_terminal(&event("ping", json!({"type": "ping"}))));
    }

    #[test]
    fn test_unnamed_event_terminal_by_type() {
        let unnamed = |data: Value| WireMessage::Event(SseEvent::data(data.to_string()));

        assert!(Anthropic.is_terminal(&unnamed(json!({"type": "message_stop"}))));
        assert!(!Anthropic.is_terminal(&unnamed(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "\"message_stop\""}
        }))));
        assert!(!Anthropic.is_terminal(&WireMessage::Event(SseEvent::data("{broken"))));
    }
}
