//! Folds a complete chunk sequence into one [`Response`].
//!
//! The default algorithm is vendor-neutral. Vendor quirks are corrected by
//! [`ResponseHooks`], applied around it in a fixed order:
//! finish-reason correction, default build, non-empty content guarantee,
//! continuation id propagation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::context::{Context, MergePolicy};
use crate::model::{
    ContentPart, FinishReason, Message, ReasoningDetail, Response, Role, StreamChunk,
    TerminalMetadata, ToolArguments, ToolCall, Usage,
};

/// Message metadata key that carries a continuation identifier.
pub const CONTINUATION_ID_KEY: &str = "continuation_id";

/// Inputs to the builder that do not come from the stream.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Requested model, used when the stream does not report one
    pub model: String,

    /// Conversation the new message is merged into
    pub context: Context,

    pub merge_policy: MergePolicy,
}

impl BuildOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }
}

/// Quirk corrections a vendor opts into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHooks {
    /// Report `tool_calls` when a tool call was streamed but the vendor said `stop`
    pub correct_finish_reason: bool,

    /// Give a tool-call message with no content one empty text part
    pub ensure_content: bool,

    /// Copy the continuation id into the message metadata
    pub propagate_continuation_id: bool,
}

impl ResponseHooks {
    pub fn with_finish_reason_correction(mut self) -> Self {
        self.correct_finish_reason = true;
        self
    }

    pub fn with_content_guarantee(mut self) -> Self {
        self.ensure_content = true;
        self
    }

    pub fn with_continuation_id(mut self) -> Self {
        self.propagate_continuation_id = true;
        self
    }
}

/// Build a response with `hooks` composed around the default algorithm.
pub fn build_with_hooks(
    chunks: &[StreamChunk],
    metadata: TerminalMetadata,
    options: BuildOptions,
    hooks: ResponseHooks,
) -> Result<Response, ClientError> {
    let metadata = fold_metadata(chunks, metadata);
    let continuation_id = metadata.continuation_id.clone();

    let metadata = if hooks.correct_finish_reason {
        correct_finish_reason(chunks, metadata)
    } else {
        metadata
    };

    let mut response = build(chunks, metadata, options)?;

    if hooks.ensure_content {
        response = ensure_content(response);
    }
    if hooks.propagate_continuation_id {
        response = propagate_continuation_id(response, continuation_id);
    }

    Ok(response)
}

/// The default build algorithm, without vendor hooks.
///
/// `Meta` chunks in `chunks` are folded under `metadata`, which wins where
/// both report a field.
pub fn build(
    chunks: &[StreamChunk],
    metadata: TerminalMetadata,
    options: BuildOptions,
) -> Result<Response, ClientError> {
    let metadata = fold_metadata(chunks, metadata);

    let has_content = chunks
        .iter()
        .any(|chunk| !matches!(chunk, StreamChunk::Meta(_)));
    if !has_content && metadata.finish_reason.is_none() && metadata.error.is_none() {
        return Err(ClientError::EmptyStream);
    }

    let text: String = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Text { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    let content = if text.is_empty() {
        Vec::new()
    } else {
        vec![ContentPart::text(text)]
    };

    let tool_calls = collect_tool_calls(chunks);
    let reasoning_details = collect_reasoning(chunks);

    let usage = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Usage(usage) => Some(usage),
            _ => None,
        })
        .chain(metadata.usage.as_ref())
        .fold(None, |acc: Option<Usage>, snapshot| {
            Some(acc.unwrap_or_default().merge(snapshot))
        });

    let finish_reason = if metadata.error.is_some() {
        FinishReason::Error
    } else {
        metadata.finish_reason.unwrap_or(FinishReason::Stop)
    };

    let message = Message::new(Role::Assistant, content)
        .with_tool_calls(tool_calls)
        .with_reasoning_details(reasoning_details);

    debug!(
        chunks = chunks.len(),
        tool_calls = message.tool_calls().len(),
        reasoning = message.reasoning_details.as_ref().map_or(0, |d| d.len()),
        ?finish_reason,
        "built response"
    );

    Ok(Response {
        id: metadata.response_id.unwrap_or_default(),
        model: metadata.model.unwrap_or(options.model),
        context: options
            .context
            .with_message(message.clone(), options.merge_policy),
        message,
        usage,
        finish_reason,
        provider_meta: metadata.provider_meta,
        error: metadata.error,
    })
}

fn fold_metadata(chunks: &[StreamChunk], metadata: TerminalMetadata) -> TerminalMetadata {
    chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Meta(meta) => Some(meta.clone()),
            _ => None,
        })
        .fold(TerminalMetadata::default(), TerminalMetadata::absorb)
        .overlay(metadata)
}

/// Rewrite a normal stop to `tool_calls` when any tool call was streamed.
pub fn correct_finish_reason(chunks: &[StreamChunk], metadata: TerminalMetadata) -> TerminalMetadata {
    let saw_tool_call = chunks
        .iter()
        .any(|chunk| matches!(chunk, StreamChunk::ToolCall { .. }));

    match metadata.finish_reason {
        None | Some(FinishReason::Stop) if saw_tool_call => TerminalMetadata {
            finish_reason: Some(FinishReason::ToolCalls),
            ..metadata
        },
        _ => metadata,
    }
}

/// Give a tool-call message without content a single empty text part.
pub fn ensure_content(response: Response) -> Response {
    map_message(response, |message| {
        if message.content.is_empty() && !message.tool_calls().is_empty() {
            Message {
                content: vec![ContentPart::text("")],
                ..message
            }
        } else {
            message
        }
    })
}

/// Store the continuation identifier in the message metadata.
pub fn propagate_continuation_id(response: Response, continuation_id: Option<String>) -> Response {
    match continuation_id {
        Some(id) => map_message(response, |message| {
            message.with_metadata(CONTINUATION_ID_KEY, Value::String(id))
        }),
        None => response,
    }
}

/// Replace the message, keeping the copy merged into the context in sync.
fn map_message(response: Response, f: impl FnOnce(Message) -> Message) -> Response {
    let message = f(response.message);

    let mut messages = response.context.messages;
    if let Some(last) = messages.last_mut() {
        *last = message.clone();
    }

    Response {
        message,
        context: Context { messages },
        ..response
    }
}

struct ToolGroup {
    id: String,
    name: String,
    index: usize,
    fragments: String,
    complete: Option<Map<String, Value>>,
}

fn collect_tool_calls(chunks: &[StreamChunk]) -> Vec<ToolCall> {
    let mut groups: Vec<ToolGroup> = Vec::new();

    for chunk in chunks {
        let StreamChunk::ToolCall {
            id,
            name,
            arguments,
            index,
        } = chunk
        else {
            continue;
        };

        let slot = if !id.is_empty() {
            groups.iter().position(|g| g.id == *id).or_else(|| {
                groups
                    .iter()
                    .rposition(|g| g.index == *index && g.id.is_empty() && g.complete.is_none())
            })
        } else if matches!(arguments, ToolArguments::Complete(_)) {
            None
        } else {
            groups.iter().rposition(|g| g.index == *index)
        };

        let group = match slot {
            Some(position) => &mut groups[position],
            None => {
                groups.push(ToolGroup {
                    id: String::new(),
                    name: String::new(),
                    index: *index,
                    fragments: String::new(),
                    complete: None,
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };

        if group.id.is_empty() {
            group.id.clone_from(id);
        }
        if group.name.is_empty() {
            group.name.clone_from(name);
        }
        match arguments {
            ToolArguments::Partial(fragment) => group.fragments.push_str(fragment),
            ToolArguments::Complete(map) => group.complete = Some(map.clone()),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(position, group)| finish_tool_call(position, group))
        .collect()
}

fn finish_tool_call(position: usize, group: ToolGroup) -> ToolCall {
    let id = if group.id.is_empty() {
        format!("call_{position}")
    } else {
        group.id
    };

    if let Some(map) = group.complete {
        return ToolCall::function(id, group.name, Value::Object(map).to_string());
    }

    let raw = group.fragments;
    if raw.trim().is_empty() {
        return ToolCall::function(id, group.name, "{}");
    }

    let error = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => {
            return ToolCall::function(id, group.name, Value::Object(map).to_string());
        }
        Ok(_) => "arguments are not a JSON object".to_string(),
        Err(e) => e.to_string(),
    };

    warn!(tool_call = %id, name = %group.name, %error, "tool call arguments did not parse");
    ToolCall {
        error: Some(error),
        ..ToolCall::function(id, group.name, raw)
    }
}

fn collect_reasoning(chunks: &[StreamChunk]) -> Vec<ReasoningDetail> {
    chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Thinking { text, metadata } => Some((text, metadata)),
            _ => None,
        })
        .enumerate()
        .map(|(index, (text, metadata))| ReasoningDetail {
            text: text.clone(),
            signature: metadata.signature.clone(),
            encrypted: metadata.encrypted,
            provider: metadata.provider,
            format: metadata.format.clone(),
            index,
            provider_data: metadata.provider_data.clone(),
        })
        .collect()
}
