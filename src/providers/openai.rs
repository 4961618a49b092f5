//! OpenAI Responses API stream adapter.
//!
//! The Responses API names every SSE event (`response.output_text.delta`,
//! `response.completed`, ...) and repeats the name in the payload's `type`.
//! Tool-call argument deltas carry only the output index of their call.
//! See: <https://platform.openai.com/docs/api-reference/responses-streaming>

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

const TERMINAL_EVENTS: [&str; 3] = ["response.completed", "response.incomplete", "response.failed"];

/// OpenAI Responses API.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAi;

impl Provider for OpenAi {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
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

        let event: OpenAiStreamEvent = serde_json::from_str(&event.data)?;
        Ok(event.into_chunks())
    }

    fn is_terminal(&self, message: &WireMessage) -> bool {
        let WireMessage::Event(event) = message else {
            return false;
        };
        if event.is_done() {
            return true;
        }

        match event.event.as_deref() {
            Some(name) => TERMINAL_EVENTS.contains(&name),
            None => serde_json::from_str::<EventType>(&event.data)
                .is_ok_and(|e| TERMINAL_EVENTS.contains(&e.kind.as_str())),
        }
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default()
            .with_finish_reason_correction()
            .with_content_guarantee()
            .with_continuation_id()
    }
}

impl OpenAiStreamEvent {
    fn into_chunks(self) -> Vec<StreamChunk> {
        match self {
            OpenAiStreamEvent::ResponseCreated { response } => {
                vec![StreamChunk::Meta(StreamMeta {
                    response_id: response.id,
                    model: response.model,
                    ..StreamMeta::default()
                })]
            }
            OpenAiStreamEvent::ResponseOutputTextDelta { delta } => vec![StreamChunk::text(delta)],
            OpenAiStreamEvent::ResponseReasoningTextDelta { delta } => vec![StreamChunk::thinking(
                delta,
                ThinkingMetadata::new(ReasoningProvider::Openai, "openai-responses-v1"),
            )],
            OpenAiStreamEvent::ResponseReasoningSummaryTextDelta { delta, summary_index } => {
                vec![StreamChunk::thinking(
                    delta,
                    ThinkingMetadata::new(ReasoningProvider::Openai, "openai-responses-v1")
                        .with_provider_data("summary_index", json!(summary_index)),
                )]
            }
            OpenAiStreamEvent::ResponseOutputItemAdded { output_index, item } => match item {
                OpenAiOutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => vec![StreamChunk::tool_call(
                    call_id,
                    name,
                    ToolArguments::Partial(arguments),
                    output_index,
                )],
                _ => Vec::new(),
            },
            OpenAiStreamEvent::ResponseFunctionCallArgumentsDelta { output_index, delta } => {
                vec![StreamChunk::tool_call(
                    "",
                    "",
                    ToolArguments::Partial(delta),
                    output_index,
                )]
            }
            OpenAiStreamEvent::ResponseOutputItemDone { item } => match item {
                OpenAiOutputItem::Reasoning {
                    id,
                    encrypted_content: Some(encrypted),
                } => {
                    let mut metadata =
                        ThinkingMetadata::new(ReasoningProvider::Openai, "openai-responses-v1")
                            .with_signature(encrypted)
                            .encrypted();
                    if let Some(id) = id {
                        metadata = metadata.with_provider_data("id", Value::String(id));
                    }
                    vec![StreamChunk::thinking("", metadata)]
                }
                _ => Vec::new(),
            },
            OpenAiStreamEvent::ResponseCompleted { response }
            | OpenAiStreamEvent::ResponseIncomplete { response }
            | OpenAiStreamEvent::ResponseFailed { response } => response.into_chunks(),
            OpenAiStreamEvent::Error { code, message } => {
                let mut meta = StreamMeta::error(message);
                if let Some(code) = code {
                    meta.provider_meta.insert("error_code".to_string(), Value::String(code));
                }
                vec![StreamChunk::Meta(meta)]
            }
            OpenAiStreamEvent::Other => Vec::new(),
        }
    }
}

impl OpenAiResponse {
    fn into_chunks(self) -> Vec<StreamChunk> {
        let finish_reason = match (&self.error, &self.incomplete_details) {
            (Some(_), _) => FinishReason::Error,
            (None, Some(details)) => details.reason.into(),
            (None, None) => FinishReason::Stop,
        };

        let mut provider_meta = Map::new();
        if let Some(status) = self.status {
            provider_meta.insert("status".to_string(), Value::String(status));
        }

        let meta = StreamMeta {
            finish_reason: Some(finish_reason),
            continuation_id: self.id.clone(),
            response_id: self.id,
            model: self.model,
            error: self.error.map(|e| e.message),
            provider_meta,
        };

        let mut chunks = Vec::new();
        if let Some(usage) = self.usage {
            chunks.push(StreamChunk::Usage(usage.into()));
        }
        chunks.push(StreamChunk::Meta(meta));
        chunks
    }
}

// --- OpenAI Responses stream types ---

#[derive(Debug, Deserialize)]
struct EventType {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum OpenAiStreamEvent {
    #[serde(rename = "response.created")]
    ResponseCreated { response: OpenAiResponse },
    #[serde(rename = "response.output_text.delta")]
    ResponseOutputTextDelta { delta: String },
    #[serde(rename = "response.reasoning_text.delta")]
    ResponseReasoningTextDelta { delta: String },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ResponseReasoningSummaryTextDelta {
        delta: String,
        #[serde(default)]
        summary_index: usize,
    },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        output_index: usize,
        item: OpenAiOutputItem,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta { output_index: usize, delta: String },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone { item: OpenAiOutputItem },
    #[serde(rename = "response.completed")]
    ResponseCompleted { response: OpenAiResponse },
    #[serde(rename = "response.incomplete")]
    ResponseIncomplete { response: OpenAiResponse },
    #[serde(rename = "response.failed")]
    ResponseFailed { response: OpenAiResponse },
    #[serde(rename = "error")]
    Error {
        code: Option<String>,
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiOutputItem {
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        id: Option<String>,
        encrypted_content: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponse {
    id: Option<String>,
    model: Option<String>,
    status: Option<String>,
    usage: Option<OpenAiUsage>,
    incomplete_details: Option<IncompleteDetails>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IncompleteReason {
    MaxOutputTokens,
    ContentFilter,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct IncompleteDetails {
    reason: IncompleteReason,
}

impl From<IncompleteReason> for FinishReason {
    fn from(reason: IncompleteReason) -> Self {
        match reason {
            IncompleteReason::MaxOutputTokens => FinishReason::Length,
            IncompleteReason::ContentFilter => FinishReason::ContentFilter,
            IncompleteReason::Other => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: Option<u32>,
    input_tokens_details: Option<InputTokensDetails>,
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct InputTokensDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputTokensDetails {
    reasoning_tokens: Option<u32>,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: Some(u.input_tokens),
            output_tokens: Some(u.output_tokens),
            reasoning_tokens: u.output_tokens_details.and_then(|d| d.reasoning_tokens),
            cached_tokens: u.input_tokens_details.and_then(|d| d.cached_tokens),
            total_tokens: u.total_tokens,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, CONTINUATION_ID_KEY};
    use crate::model::TerminalMetadata;
    use crate::sse::SseEvent;
    use crate::stream::Pipeline;

    fn event(name: &str, data: Value) -> WireMessage {
        WireMessage::Event(SseEvent::named(name, data.to_string()))
    }

    fn classify(name: &str, data: Value) -> Vec<StreamChunk> {
        OpenAi.classify(&event(name, data), "gpt-5").unwrap()
    }

    #[test]
    fn test_text_and_reasoning_deltas() {
        assert_eq!(
            classify(
                "response.output_text.delta",
                json!({"type": "response.output_text.delta", "delta": "Hi", "output_index": 1})
            ),
            vec![StreamChunk::text("Hi")]
        );

        let chunks = classify(
            "response.reasoning_summary_text.delta",
            json!({"type": "response.reasoning_summary_text.delta", "delta": "think", "summary_index": 0}),
        );
        assert!(matches!(
            &chunks[..],
            [StreamChunk::Thinking { text, metadata }] if text == "think" && metadata.provider == ReasoningProvider::Openai
        ));
    }

    #[test]
    fn test_function_call_events() {
        let opened = classify(
            "response.output_item.added",
            json!({
                "type": "response.output_item.added",
                "output_index": 2,
                "item": {"type": "function_call", "id": "fc_1", "call_id": "call_9", "name": "lookup", "arguments": ""}
            }),
        );
        assert_eq!(
            opened,
            vec![StreamChunk::tool_call("call_9", "lookup", ToolArguments::empty(), 2)]
        );

        let delta = classify(
            "response.function_call_arguments.delta",
            json!({"type": "response.function_call_arguments.delta", "output_index": 2, "item_id": "fc_1", "delta": "{\"q\":"}),
        );
        assert_eq!(
            delta,
            vec![StreamChunk::tool_call("", "", ToolArguments::Partial("{\"q\":".into()), 2)]
        );
    }

    #[test]
    fn test_encrypted_reasoning_item() {
        let chunks = classify(
            "response.output_item.done",
            json!({
                "type": "response.output_item.done",
                "output_index": 0,
                "item": {"type": "reasoning", "id": "rs_1", "encrypted_content": "gAAAA", "summary": []}
            }),
        );
        let [StreamChunk::Thinking { metadata, .. }] = &chunks[..] else {
            panic!("expected one thinking chunk, got {chunks:?}");
        };
        assert!(metadata.encrypted);
        assert_eq!(metadata.signature.as_deref(), Some("gAAAA"));
        assert_eq!(metadata.provider_data["id"], json!("rs_1"));
    }

    #[test]
    fn test_completed_event() {
        let message = event(
            "response.completed",
            json!({
                "type": "response.completed",
                "response": {
                    "id": "resp_1",
                    "model": "gpt-5",
                    "status": "completed",
                    "usage": {
                        "input_tokens": 10,
                        "output_tokens": 5,
                        "total_tokens": 15,
                        "input_tokens_details": {"cached_tokens": 2},
                        "output_tokens_details": {"reasoning_tokens": 3}
                    }
                }
            }),
        );
        assert!(OpenAi.is_terminal(&message));

        let chunks = OpenAi.classify(&message, "gpt-5").unwrap();
        let [StreamChunk::Usage(usage), StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(usage.cached_tokens, Some(2));
        assert_eq!(usage.reasoning_tokens, Some(3));
        assert_eq!(meta.finish_reason, Some(FinishReason::Stop));
        assert_eq!(meta.continuation_id.as_deref(), Some("resp_1"));
    }

    #[test]
    fn test_incomplete_maps_to_length() {
        let chunks = classify(
            "response.incomplete",
            json!({
                "type": "response.incomplete",
                "response": {"id": "resp_2", "incomplete_details": {"reason": "max_output_tokens"}}
            }),
        );
        assert!(chunks.contains(&StreamChunk::Meta(StreamMeta {
            finish_reason: Some(FinishReason::Length),
            response_id: Some("resp_2".into()),
            continuation_id: Some("resp_2".into()),
            ..StreamMeta::default()
        })));
    }

    #[test]
    fn test_error_event() {
        let chunks = classify(
            "error",
            json!({"type": "error", "code": "server_error", "message": "boom"}),
        );
        let [StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(meta.finish_reason, Some(FinishReason::Error));
        assert_eq!(meta.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert!(classify("response.in_progress", json!({"type": "response.in_progress"})).is_empty());
        assert!(!OpenAi.is_terminal(&event("response.in_progress", json!({"type": "response.in_progress"}))));
    }

    #[test]
    fn test_terminal_without_event_name() {
        let message = WireMessage::Event(SseEvent::data(
            json!({"type": "response.completed", "response": {"id": "r"}}).to_string(),
        ));
        assert!(OpenAi.is_terminal(&message));
    }

    #[test]
    fn test_hooks_propagate_continuation_id() {
        let chunks = vec![
            StreamChunk::tool_call("call_1", "lookup", ToolArguments::Partial("{}".into()), 0),
            StreamChunk::Meta(StreamMeta {
                response_id: Some("resp_7".into()),
                continuation_id: Some("resp_7".into()),
                ..StreamMeta::default()
            }),
        ];
        let response = OpenAi
            .build_response(&chunks, TerminalMetadata::default(), BuildOptions::new("gpt-5"))
            .unwrap();

        assert_eq!(response.message.metadata[CONTINUATION_ID_KEY], json!("resp_7"));
        assert_eq!(response.message.content.len(), 1);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_completed_function_call_finishes_with_tool_calls() {
        let mut body = String::new();
        for data in [
            json!({"type": "response.created", "response": {"id": "resp_2", "model": "gpt-5"}}),
            json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "function_call", "call_id": "call_1", "name": "lookup", "arguments": ""}}),
            json!({"type": "response.function_call_arguments.delta", "output_index": 0, "delta": "{}"}),
            json!({"type": "response.completed", "response": {"id": "resp_2", "model": "gpt-5", "status": "completed"}}),
        ] {
            body.push_str(&format!("event: {}\ndata: {data}\n\n", data["type"].as_str().unwrap()));
        }

        let mut pipeline = Pipeline::for_provider(ProviderId::OpenAi, "gpt-5", Default::default());
        pipeline.feed(body.as_bytes()).unwrap();
        assert!(pipeline.is_done());

        let response = pipeline.finish(Default::default()).unwrap();
        assert_eq!(response.tool_calls().len(), 1);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_rejects_other_framings() {
        let frame = WireMessage::Line("{}".into());
        assert!(matches!(
            OpenAi.classify(&frame, "gpt-5"),
            Err(ClientError::ProviderError(_))
        ));
    }
}
