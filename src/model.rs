//! Canonical data models shared by every provider.
//!
//! Nothing vendor-specific lives here: classifiers translate wire events into
//! [`StreamChunk`]s and the builder folds those into a [`Response`].

use itertools::Itertools;
use nonempty::NonEmpty;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One block of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { data: String, media_type: String },
    ImageUrl { url: String },
}

impl ContentPart {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// The text of this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Function name and serialized arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON object encoded to a string
    pub arguments: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
    /// Set when the streamed arguments did not form a JSON object.
    /// `function.arguments` then holds the raw text as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// Create a function tool call.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            error: None,
        }
    }

    /// Whether the arguments failed to parse.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Parse the arguments back into a JSON object.
    pub fn parsed_arguments(&self) -> Result<Map<String, Value>, serde_json::Error> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// Vendor family a reasoning segment came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningProvider {
    Anthropic,
    Openai,
    Google,
    Openrouter,
    Bedrock,
    Ollama,
    #[default]
    Unknown,
}

/// Normalized reasoning record attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningDetail {
    pub text: String,
    /// Opaque continuation token some vendors require on replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    pub provider: ReasoningProvider,
    pub format: String,
    /// Position among reasoning segments only
    pub index: usize,
    /// Raw vendor fields kept for lossless re-encoding
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_data: Map<String, Value>,
}

/// A single message in a conversation.
///
/// Content is always an ordered list of parts. A bare string is accepted on
/// deserialization and normalized into one text part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,

    #[serde(deserialize_with = "content_parts")]
    pub content: Vec<ContentPart>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// `None` when no reasoning was streamed, never an empty list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<NonEmpty<ReasoningDetail>>,

    /// Vendor passthrough, e.g. a continuation id for stateless multi-turn APIs
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// Create a message from content parts.
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            reasoning_details: None,
            metadata: Map::new(),
        }
    }

    /// Create a message holding a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentPart::text(text)])
    }

    /// Set the tool calls. An empty list clears them.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls).filter(|calls| !calls.is_empty());
        self
    }

    /// Set the reasoning details. An empty list clears them.
    pub fn with_reasoning_details(mut self, details: Vec<ReasoningDetail>) -> Self {
        self.reasoning_details = NonEmpty::from_vec(details);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        self.content.iter().filter_map(ContentPart::as_text).join("")
    }

    /// Tool calls of this message, empty if there are none.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

fn content_parts<'de, D>(deserializer: D) -> Result<Vec<ContentPart>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Content {
        Bare(String),
        Parts(Vec<ContentPart>),
    }

    Ok(match Content::deserialize(deserializer)? {
        Content::Bare(text) => vec![ContentPart::text(text)],
        Content::Parts(parts) => parts,
    })
}

/// Reason for finishing the response generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,

    /// Vendor counters without a canonical field
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Usage {
    /// Overlay a later snapshot on top of this one.
    ///
    /// Fields present in `snapshot` win; absent fields keep their earlier value.
    pub fn merge(self, snapshot: &Usage) -> Usage {
        let mut extra = self.extra;
        extra.extend(snapshot.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        Usage {
            input_tokens: snapshot.input_tokens.or(self.input_tokens),
            output_tokens: snapshot.output_tokens.or(self.output_tokens),
            reasoning_tokens: snapshot.reasoning_tokens.or(self.reasoning_tokens),
            cached_tokens: snapshot.cached_tokens.or(self.cached_tokens),
            total_tokens: snapshot.total_tokens.or(self.total_tokens),
            extra,
        }
    }
}

/// Arguments carried by a tool-call chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolArguments {
    /// A fragment of JSON text, concatenated with its siblings at build time
    Partial(String),
    /// An object the vendor delivered whole
    Complete(Map<String, Value>),
}

impl ToolArguments {
    /// An empty fragment, used by chunks that only open a tool call.
    pub fn empty() -> Self {
        ToolArguments::Partial(String::new())
    }
}

/// Metadata carried by a thinking chunk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ThinkingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    pub provider: ReasoningProvider,
    pub format: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_data: Map<String, Value>,
}

impl ThinkingMetadata {
    /// Metadata for a plain reasoning delta.
    pub fn new(provider: ReasoningProvider, format: impl Into<String>) -> Self {
        Self {
            provider,
            format: format.into(),
            ..Self::default()
        }
    }

    /// Attach an opaque continuation signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Mark the segment as encrypted.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Keep a raw vendor field.
    pub fn with_provider_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.provider_data.insert(key.into(), value);
        self
    }
}

/// Terminal-state signal emitted by a classifier.
///
/// Several of these may arrive over a stream; later values win.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_meta: Map<String, Value>,
}

impl StreamMeta {
    /// A meta chunk carrying only a finish reason.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// A meta chunk reporting an in-stream vendor error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(FinishReason::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// One unit of streamed content in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Answer text delta
    Text { delta: String },

    /// Tool-call fragment; fragments of one call share `id` and/or `index`
    ToolCall {
        id: String,
        name: String,
        arguments: ToolArguments,
        index: usize,
    },

    /// Reasoning segment
    Thinking {
        text: String,
        metadata: ThinkingMetadata,
    },

    /// Token usage snapshot
    Usage(Usage),

    /// Terminal-state information
    Meta(StreamMeta),
}

impl StreamChunk {
    /// Create a text chunk.
    pub fn text(delta: impl Into<String>) -> Self {
        StreamChunk::Text { delta: delta.into() }
    }

    /// Create a tool-call chunk.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: ToolArguments,
        index: usize,
    ) -> Self {
        StreamChunk::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
            index,
        }
    }

    /// Create a thinking chunk.
    pub fn thinking(text: impl Into<String>, metadata: ThinkingMetadata) -> Self {
        StreamChunk::Thinking {
            text: text.into(),
            metadata,
        }
    }
}

/// Out-of-band information delivered at stream end.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TerminalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_meta: Map<String, Value>,
}

impl TerminalMetadata {
    /// Terminal metadata with only a finish reason.
    pub fn finished(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// Fold a meta chunk into this metadata, later values winning.
    pub fn absorb(self, meta: StreamMeta) -> Self {
        let mut provider_meta = self.provider_meta;
        provider_meta.extend(meta.provider_meta);

        Self {
            finish_reason: meta.finish_reason.or(self.finish_reason),
            usage: self.usage,
            response_id: meta.response_id.or(self.response_id),
            model: meta.model.or(self.model),
            continuation_id: meta.continuation_id.or(self.continuation_id),
            error: meta.error.or(self.error),
            provider_meta,
        }
    }

    /// Overlay metadata that arrived later; its present fields win.
    pub fn overlay(self, later: TerminalMetadata) -> Self {
        let usage = match (self.usage, later.usage) {
            (Some(earlier), Some(later)) => Some(earlier.merge(&later)),
            (earlier, later) => later.or(earlier),
        };

        let meta = StreamMeta {
            finish_reason: later.finish_reason,
            response_id: later.response_id,
            model: later.model,
            continuation_id: later.continuation_id,
            error: later.error,
            provider_meta: later.provider_meta,
        };

        Self { usage, ..self }.absorb(meta)
    }
}

/// Provider-agnostic response built from one completed stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: String,

    pub model: String,

    /// Conversation with `message` merged in
    pub context: Context,

    pub message: Message,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub finish_reason: FinishReason,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_meta: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Answer text of the message.
    pub fn text(&self) -> String {
        self.message.text_content()
    }

    /// Reasoning text of the message, segments joined in order.
    pub fn thinking(&self) -> String {
        self.message
            .reasoning_details
            .iter()
            .flat_map(|details| details.iter())
            .map(|detail| detail.text.as_str())
            .join("")
    }

    /// Tool calls of the message.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_content_from_bare_string() {
        let message: Message =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).unwrap();
        assert_eq!(message.content, vec![ContentPart::text("hello")]);
        assert_eq!(message.text_content(), "hello");
    }

    #[test]
    fn test_message_content_from_parts() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "a"},
                {"type": "image_url", "url": "https://example.com/x.png"},
                {"type": "text", "text": "b"}
            ]
        }))
        .unwrap();
        assert_eq!(message.content.len(), 3);
        assert_eq!(message.text_content(), "ab");
    }

    #[test]
    fn test_empty_reasoning_details_is_none() {
        let message = Message::text(Role::Assistant, "x").with_reasoning_details(vec![]);
        assert!(message.reasoning_details.is_none());

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("reasoning_details").is_none());
    }

    #[test]
    fn test_empty_tool_calls_is_none() {
        let message = Message::text(Role::Assistant, "x").with_tool_calls(vec![]);
        assert!(message.tool_calls.is_none());
        assert!(message.tool_calls().is_empty());
    }

    #[test]
    fn test_usage_merge_overlays_later_fields() {
        let first = Usage {
            input_tokens: Some(10),
            output_tokens: Some(1),
            ..Usage::default()
        };
        let second = Usage {
            output_tokens: Some(42),
            ..Usage::default()
        };

        let merged = first.merge(&second);
        assert_eq!(merged.input_tokens, Some(10));
        assert_eq!(merged.output_tokens, Some(42));
        assert_eq!(merged.total_tokens, None);
    }

    #[test]
    fn test_terminal_metadata_absorb() {
        let metadata = TerminalMetadata::default()
            .absorb(StreamMeta {
                response_id: Some("r1".to_string()),
                ..StreamMeta::default()
            })
            .absorb(StreamMeta::finish(FinishReason::Length));

        assert_eq!(metadata.response_id.as_deref(), Some("r1"));
        assert_eq!(metadata.finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn test_finish_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
        assert_eq!(
            serde_json::from_str::<FinishReason>("\"content_filter\"").unwrap(),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn test_tool_call_parsed_arguments() {
        let call = ToolCall::function("c1", "lookup", r#"{"q":"rust"}"#);
        assert_eq!(call.kind, "function");
        assert_eq!(call.parsed_arguments().unwrap()["q"], json!("rust"));
    }
}
