//! Core provider trait and error types.

use thiserror::Error;

use crate::builder::{build_with_hooks, BuildOptions, ResponseHooks};
use crate::context::MergePolicy;
use crate::eventstream::EventStreamError;
use crate::model::{Response, StreamChunk, TerminalMetadata};
use crate::providers::ProviderId;
use crate::stream::{Framing, WireMessage};

/// Errors that can occur while normalizing a stream.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Frame decode error: {0}")]
    Decode(#[from] EventStreamError),

    /// Non-success status on the initial response; the body never reached the pipeline.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Stream ended before any event was received")]
    EmptyStream,
}

impl ClientError {
    /// Whether this error came from decoding or classifying one message,
    /// as opposed to the connection or the frame layer.
    pub fn is_message_error(&self) -> bool {
        matches!(self, ClientError::Parse(_) | ClientError::ProviderError(_))
    }
}

/// Vendor adapter consumed by the streaming pipeline.
///
/// Implement this trait to add support for a new LLM provider. The
/// classifier is the only place that knows the vendor's wire format; it
/// must not keep state between messages, so that the builder owns every
/// ordering decision.
///
/// # Required Methods
/// - `id`: Registry key of the vendor
/// - `framing`: Which frame decoder the vendor's transport needs
/// - `classify`: Turn one protocol message into canonical chunks
/// - `merge_policy`: How the built message joins the conversation
///
/// # Provided Methods (with default implementations)
/// - `is_terminal`: Recognizes the `[DONE]` data marker
/// - `hooks`: No quirk correction
/// - `build_response`: The shared builder with `hooks()` applied
///
/// # Example
/// ```rust,ignore
/// struct MyProvider;
///
/// impl Provider for MyProvider {
///     fn id(&self) -> ProviderId { ProviderId::OpenRouter }
///     fn framing(&self) -> Framing { Framing::Sse }
///
///     fn classify(&self, message: &WireMessage, model: &str) -> Result<Vec<StreamChunk>, ClientError> {
///         // Map vendor fields to chunks
///     }
///
///     fn merge_policy(&self) -> MergePolicy { MergePolicy::Append }
/// }
/// ```
pub trait Provider: Send + Sync {
    /// Registry key of this vendor.
    fn id(&self) -> ProviderId;

    /// Framing used by the vendor's streaming transport.
    fn framing(&self) -> Framing;

    /// Classify one decoded protocol message.
    ///
    /// Unknown event kinds yield no chunks. A malformed payload is an error
    /// for this message only; the pipeline decides whether to continue.
    fn classify(&self, message: &WireMessage, model: &str) -> Result<Vec<StreamChunk>, ClientError>;

    /// Whether `message` ends the stream. Terminal messages are still classified.
    fn is_terminal(&self, message: &WireMessage) -> bool {
        matches!(message, WireMessage::Event(event) if event.is_done())
    }

    /// Merge behavior for this vendor, declared explicitly by every adapter.
    fn merge_policy(&self) -> MergePolicy;

    /// Quirk corrections applied around the default builder.
    fn hooks(&self) -> ResponseHooks {
        ResponseHooks::default()
    }

    /// Build the final response from the complete chunk sequence.
    fn build_response(
        &self,
        chunks: &[StreamChunk],
        metadata: TerminalMetadata,
        options: BuildOptions,
    ) -> Result<Response, ClientError> {
        build_with_hooks(chunks, metadata, options, self.hooks())
    }
}

/// Error for a protocol message the adapter cannot handle at all.
pub(crate) fn unexpected_message(provider: ProviderId, message: &WireMessage) -> ClientError {
    ClientError::ProviderError(format!(
        "{provider} cannot classify {} messages",
        message.kind()
    ))
}
