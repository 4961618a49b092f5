//! Google Gemini `streamGenerateContent?alt=sse` adapter.
//!
//! Every SSE event is a full `GenerateContentResponse` holding the next
//! slice of parts. Function calls arrive whole, several per event when the
//! model calls tools in parallel; the stream simply ends after the last event.
//! See: <https://ai.google.dev/api/generate-content#method:-models.streamgeneratecontent>

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

const THINKING_FORMAT: &str = "google-gemini-v1";

/// Google Gemini API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gemini;

impl Provider for Gemini {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
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

        let response: GeminiResponse = serde_json::from_str(&event.data)?;
        Ok(response.into_chunks())
    }

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Append
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default().with_finish_reason_correction()
    }
}

fn signature_chunk(signature: String, part: &str) -> StreamChunk {
    StreamChunk::thinking(
        "",
        ThinkingMetadata::new(ReasoningProvider::Google, THINKING_FORMAT)
            .with_signature(signature)
            .with_provider_data("part", Value::String(part.to_string())),
    )
}

impl GeminiResponse {
    fn into_chunks(self) -> Vec<StreamChunk> {
        if let Some(error) = self.error {
            let mut meta = StreamMeta::error(error.message);
            meta.provider_meta.insert("error_code".to_string(), json!(error.code));
            return vec![StreamChunk::Meta(meta)];
        }

        let mut chunks = Vec::new();
        let mut finish_reason = None;

        for candidate in self.candidates {
            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

            for (position, part) in parts.into_iter().enumerate() {
                match part {
                    GeminiPart::Text {
                        thought,
                        text,
                        thought_signature,
                    } => {
                        if thought.unwrap_or_default() {
                            let mut metadata =
                                ThinkingMetadata::new(ReasoningProvider::Google, THINKING_FORMAT);
                            metadata.signature = thought_signature;
                            chunks.push(StreamChunk::thinking(text, metadata));
                        } else {
                            if !text.is_empty() {
                                chunks.push(StreamChunk::text(text));
                            }
                            if let Some(signature) = thought_signature {
                                chunks.push(signature_chunk(signature, "text"));
                            }
                        }
                    }
                    GeminiPart::FunctionCall {
                        thought_signature,
                        function_call,
                    } => {
                        if let Some(signature) = thought_signature {
                            chunks.push(signature_chunk(signature, "function_call"));
                        }
                        let arguments = match function_call.args {
                            Some(Value::Object(map)) => ToolArguments::Complete(map),
                            None | Some(Value::Null) => ToolArguments::Complete(Map::new()),
                            Some(other) => ToolArguments::Partial(other.to_string()),
                        };
                        chunks.push(StreamChunk::tool_call(
                            function_call.id.unwrap_or_default(),
                            function_call.name,
                            arguments,
                            position,
                        ));
                    }
                    GeminiPart::Other(_) => {}
                }
            }

            if let Some(reason) = candidate.finish_reason {
                finish_reason = Some(FinishReason::from(reason));
            }
        }

        if let Some(usage) = self.usage_metadata {
            chunks.push(StreamChunk::Usage(usage.into()));
        }

        if finish_reason.is_some() {
            chunks.push(StreamChunk::Meta(StreamMeta {
                finish_reason,
                response_id: self.response_id,
                model: self.model_version,
                ..StreamMeta::default()
            }));
        }

        chunks
    }
}

// --- Gemini API Response Types ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    model_version: Option<String>,
    response_id: Option<String>,
    usage_metadata: Option<GeminiUsageMetadata>,
    error: Option<GeminiError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<GeminiFinishReason>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        thought: Option<bool>,
        text: String,
        #[serde(rename = "thoughtSignature")]
        thought_signature: Option<String>,
    },
    FunctionCall {
        #[serde(rename = "thoughtSignature")]
        thought_signature: Option<String>,
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum GeminiFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Language,
    Blocklist,
    ProhibitedContent,
    Spii,
    ImageSafety,
    MalformedFunctionCall,
    UnexpectedToolCall,
    TooManyToolCalls,
    #[serde(other)]
    Other,
}

impl From<GeminiFinishReason> for FinishReason {
    fn from(reason: GeminiFinishReason) -> Self {
        match reason {
            GeminiFinishReason::Stop | GeminiFinishReason::Other => FinishReason::Stop,
            GeminiFinishReason::MaxTokens => FinishReason::Length,
            GeminiFinishReason::Safety
            | GeminiFinishReason::Recitation
            | GeminiFinishReason::Language
            | GeminiFinishReason::Blocklist
            | GeminiFinishReason::ProhibitedContent
            | GeminiFinishReason::Spii
            | GeminiFinishReason::ImageSafety => FinishReason::ContentFilter,
            GeminiFinishReason::MalformedFunctionCall => FinishReason::Error,
            GeminiFinishReason::UnexpectedToolCall | GeminiFinishReason::TooManyToolCalls => {
                FinishReason::ToolCalls
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
    cached_content_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

impl From<GeminiUsageMetadata> for Usage {
    fn from(u: GeminiUsageMetadata) -> Self {
        let output = match (u.candidates_token_count, u.thoughts_token_count) {
            (None, None) => None,
            (candidates, thoughts) => Some(
                candidates
                    .unwrap_or_default()
                    .saturating_add(thoughts.unwrap_or_default()),
            ),
        };

        Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: output,
            reasoning_tokens: u.thoughts_token_count,
            cached_tokens: u.cached_content_token_count,
            total_tokens: u.total_token_count,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiError {
    code: u32,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseEvent;

    fn classify(data: Value) -> Vec<StreamChunk> {
        let message = WireMessage::Event(SseEvent::data(data.to_string()));
        Gemini.classify(&message, "gemini-2.5-flash").unwrap()
    }

    #[test]
    fn test_text_and_thought_parts() {
        let chunks = classify(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "weighing options", "thought": true},
                {"text": "Paris"}
            ]}}],
            "modelVersion": "gemini-2.5-flash"
        }));
        assert_eq!(chunks.len(), 2);
        assert!(matches!(
            &chunks[0],
            StreamChunk::Thinking { text, metadata } if text == "weighing options" && metadata.provider == ReasoningProvider::Google
        ));
        assert_eq!(chunks[1], StreamChunk::text("Paris"));
    }

    #[test]
    fn test_parallel_function_calls() {
        let chunks = classify(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "weather", "args": {"city": "Paris"}}},
                {"functionCall": {"name": "weather", "args": {"city": "Rome"}}}
            ]}, "finishReason": "STOP"}],
            "responseId": "abc"
        }));

        let calls: Vec<_> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolCall { name, arguments: ToolArguments::Complete(args), index, .. } => {
                    Some((name.as_str(), args["city"].clone(), *index))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![("weather", json!("Paris"), 0), ("weather", json!("Rome"), 1)]
        );
        assert!(chunks.contains(&StreamChunk::Meta(StreamMeta {
            finish_reason: Some(FinishReason::Stop),
            response_id: Some("abc".into()),
            ..StreamMeta::default()
        })));
    }

    #[test]
    fn test_function_call_signature() {
        let chunks = classify(json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "f", "args": {}}, "thoughtSignature": "sig=="}
            ]}}]
        }));
        assert!(matches!(
            &chunks[0],
            StreamChunk::Thinking { text, metadata } if text.is_empty() && metadata.signature.as_deref() == Some("sig==")
        ));
        assert!(matches!(&chunks[1], StreamChunk::ToolCall { name, .. } if name == "f"));
    }

    #[test]
    fn test_usage_and_finish() {
        let chunks = classify(json!({
            "candidates": [{"content": {"parts": [{"text": ""}]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 20, "thoughtsTokenCount": 12, "totalTokenCount": 40}
        }));
        let [StreamChunk::Usage(usage), StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(usage.output_tokens, Some(32));
        assert_eq!(usage.reasoning_tokens, Some(12));
        assert_eq!(meta.finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn test_output_tokens_saturate() {
        let usage = Usage::from(GeminiUsageMetadata {
            prompt_token_count: None,
            candidates_token_count: Some(u32::MAX),
            thoughts_token_count: Some(5),
            cached_content_token_count: None,
            total_token_count: None,
        });
        assert_eq!(usage.output_tokens, Some(u32::MAX));
    }

    #[test]
    fn test_safety_block() {
        let chunks = classify(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        assert_eq!(
            chunks,
            vec![StreamChunk::Meta(StreamMeta::finish(FinishReason::ContentFilter))]
        );
    }

    #[test]
    fn test_in_stream_error() {
        let chunks = classify(json!({"error": {"code": 503, "message": "unavailable", "status": "UNAVAILABLE"}}));
        let [StreamChunk::Meta(meta)] = &chunks[..] else {
            panic!("unexpected chunks {chunks:?}");
        };
        assert_eq!(meta.error.as_deref(), Some("unavailable"));
    }

    #[test]
    fn test_unknown_part_is_ignored() {
        let chunks = classify(json!({
            "candidates": [{"content": {"parts": [{"executableCode": {"code": "print(1)"}}]}}]
        }));
        assert!(chunks.is_empty());
    }
}
