//! AWS Bedrock `ConverseStream` adapter.
//!
//! The body is an `application/vnd.amazon.eventstream` byte stream. Each
//! frame names its event in the `:event-type` header and carries the event
//! body as a JSON payload; `:message-type = exception` frames report errors.
//! `metadata` (usage and latency) is the last event of a successful stream.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::builder::ResponseHooks;
use crate::client::{unexpected_message, ClientError, Provider};
use crate::context::MergePolicy;
use crate::eventstream::EventMessage;
use crate::model::{
    FinishReason, ReasoningProvider, StreamChunk, StreamMeta, ThinkingMetadata, ToolArguments,
    Usage,
};
use crate::providers::ProviderId;
use crate::stream::{Framing, WireMessage};

const THINKING_FORMAT: &str = "bedrock-converse-v1";

/// AWS Bedrock Converse stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bedrock;

impl Provider for Bedrock {
    fn id(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    fn framing(&self) -> Framing {
        Framing::EventStream
    }

    fn classify(&self, message: &WireMessage, _model: &str) -> Result<Vec<StreamChunk>, ClientError> {
        let WireMessage::Frame(frame) = message else {
            return Err(unexpected_message(self.id(), message));
        };

        match frame.message_type().unwrap_or("event") {
            "event" => classify_event(frame),
            "exception" => Ok(vec![exception_chunk(frame)]),
            "error" => {
                let code = frame.headers.get_str(":error-code").unwrap_or("UnknownError");
                let text = frame.headers.get_str(":error-message").unwrap_or_default();
                let mut meta = StreamMeta::error(format!("{code}: {text}"));
                meta.provider_meta
                    .insert("error_code".to_string(), Value::String(code.to_string()));
                Ok(vec![StreamChunk::Meta(meta)])
            }
            other => {
                trace!(message_type = other, "ignoring frame");
                Ok(Vec::new())
            }
        }
    }

    fn is_terminal(&self, message: &WireMessage) -> bool {
        matches!(message, WireMessage::Frame(frame) if frame.event_type() == Some("metadata"))
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default()
            .with_finish_reason_correction()
            .with_content_guarantee()
    }
}

/// Split a frame into its event name and body.
///
/// Without an `:event-type` header the payload is expected to be wrapped as
/// `{"<eventName>": {...}}`.
fn event_parts(frame: &EventMessage) -> Result<(String, Value), ClientError> {
    let payload = frame.json()?;

    if let Some(kind) = frame.event_type() {
        return Ok((kind.to_string(), payload));
    }

    match payload {
        Value::Object(map) if map.len() == 1 => Ok(map.into_iter().next().unwrap_or_default()),
        _ => Err(ClientError::ProviderError(
            "event-stream frame has neither an :event-type header nor a wrapped payload".to_string(),
        )),
    }
}

fn classify_event(frame: &EventMessage) -> Result<Vec<StreamChunk>, ClientError> {
    let (kind, body) = event_parts(frame)?;

    let chunks = match kind.as_str() {
        "contentBlockStart" => {
            let event: ContentBlockStart = serde_json::from_value(body)?;
            match event.start {
                Some(BlockStart {
                    tool_use: Some(tool),
                }) => vec![StreamChunk::tool_call(
                    tool.tool_use_id,
                    tool.name,
                    ToolArguments::empty(),
                    event.content_block_index,
                )],
                _ => Vec::new(),
            }
        }
        "contentBlockDelta" => {
            let event: ContentBlockDelta = serde_json::from_value(body)?;
            event.into_chunks()
        }
        "messageStop" => {
            let event: MessageStop = serde_json::from_value(body)?;
            let mut meta = StreamMeta::finish(event.stop_reason.into());
            if let Some(fields) = event.additional_model_response_fields {
                meta.provider_meta
                    .insert("additional_model_response_fields".to_string(), fields);
            }
            vec![StreamChunk::Meta(meta)]
        }
        "metadata" => {
            let event: StreamMetadata = serde_json::from_value(body)?;
            event.into_chunks()
        }
        _ => Vec::new(),
    };

    Ok(chunks)
}

fn exception_chunk(frame: &EventMessage) -> StreamChunk {
    let kind = frame
        .headers
        .get_str(":exception-type")
        .unwrap_or("UnknownException")
        .to_string();
    let text = frame
        .json()
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());

    let mut meta = StreamMeta::error(format!("{kind}: {text}"));
    meta.provider_meta
        .insert("exception_type".to_string(), Value::String(kind));
    StreamChunk::Meta(meta)
}

fn thinking_metadata(block_index: usize) -> ThinkingMetadata {
    ThinkingMetadata::new(ReasoningProvider::Bedrock, THINKING_FORMAT)
        .with_provider_data("block_index", json!(block_index))
}

impl ContentBlockDelta {
    fn into_chunks(self) -> Vec<StreamChunk> {
        let index = self.content_block_index;
        let delta = self.delta;
        let mut chunks = Vec::new();

        if let Some(text) = delta.text {
            chunks.push(StreamChunk::text(text));
        }
        if let Some(tool) = delta.tool_use {
            chunks.push(StreamChunk::tool_call(
                "",
                "",
                ToolArguments::Partial(tool.input),
                index,
            ));
        }
        if let Some(reasoning) = delta.reasoning_content {
            if let Some(text) = reasoning.text {
                chunks.push(StreamChunk::thinking(text, thinking_metadata(index)));
            }
            if let Some(signature) = reasoning.signature {
                chunks.push(StreamChunk::thinking(
                    "",
                    thinking_metadata(index).with_signature(signature),
                ));
            }
            if let Some(redacted) = reasoning.redacted_content {
                chunks.push(StreamChunk::thinking(
                    "",
                    thinking_metadata(index).with_signature(redacted).encrypted(),
                ));
            }
        }

        chunks
    }
}

impl StreamMetadata {
    fn into_chunks(self) -> Vec<StreamChunk> {
        let mut usage: Usage = self.usage.map(Usage::from).unwrap_or_default();
        if let Some(latency) = self.metrics.and_then(|m| m.latency_ms) {
            usage.extra.insert("latency_ms".to_string(), json!(latency));
        }
        vec![StreamChunk::Usage(usage)]
    }
}

// --- Converse stream event bodies ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockStart {
    #[serde(default)]
    content_block_index: usize,
    start: Option<BlockStart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStart {
    tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseStart {
    tool_use_id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockDelta {
    #[serde(default)]
    content_block_index: usize,
    delta: BlockDelta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDelta {
    text: Option<String>,
    tool_use: Option<ToolUseDelta>,
    reasoning_content: Option<ReasoningDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolUseDelta {
    #[serde(default)]
    input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReasoningDelta {
    text: Option<String>,
    signature: Option<String>,
    redacted_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStop {
    stop_reason: StopReason,
    additional_model_response_fields: Option<Value>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    ToolUse,
    GuardrailIntervened,
    ContentFiltered,
    #[serde(other)]
    Other,
}

impl From<StopReason> for FinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence | StopReason::Other => FinishReason::Stop,
            StopReason::MaxTokens => FinishReason::Length,
            StopReason::ToolUse => FinishReason::ToolCalls,
            StopReason::GuardrailIntervened | StopReason::ContentFiltered => {
                FinishReason::ContentFilter
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StreamMetadata {
    usage: Option<BedrockUsage>,
    metrics: Option<BedrockMetrics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BedrockUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    total_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_write_input_tokens: Option<u32>,
}

impl From<BedrockUsage> for Usage {
    fn from(u: BedrockUsage) -> Self {
        let mut extra = Map::new();
        if let Some(written) = u.cache_write_input_tokens {
            extra.insert("cache_write_input_tokens".to_string(), json!(written));
        }

        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            reasoning_tokens: None,
            cached_tokens: u.cache_read_input_tokens,
            total_tokens: u.total_tokens,
            extra,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BedrockMetrics {
    latency_ms: Option<u64>,
}
