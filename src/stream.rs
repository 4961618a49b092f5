//! The decode → classify → accumulate pipeline.
//!
//! Consumption is pull-based: the caller hands each network read to
//! [`Pipeline::feed`], which returns whatever chunks became complete and never
//! waits for more bytes. When the transport ends, [`Pipeline::finish`] builds
//! the [`Response`]. Dropping a pipeline early simply builds nothing.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::builder::BuildOptions;
use crate::client::{ClientError, Provider};
use crate::context::Context;
use crate::eventstream::{EventMessage, EventStreamDecoder};
use crate::model::{Response, StreamChunk, TerminalMetadata};
use crate::ndjson::NdjsonDecoder;
use crate::options::{MalformedPolicy, StreamOptions};
use crate::providers::{self, ProviderId};
use crate::sse::{SseDecoder, SseEvent};

/// One decoded protocol message, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A Server-Sent Event
    Event(SseEvent),
    /// A binary event-stream message
    Frame(EventMessage),
    /// One line of newline-delimited JSON
    Line(String),
}

impl WireMessage {
    /// Parse the message body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        match self {
            WireMessage::Event(event) => event.json(),
            WireMessage::Frame(frame) => frame.json(),
            WireMessage::Line(line) => serde_json::from_str(line),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Event(_) => "sse",
            WireMessage::Frame(_) => "event-stream",
            WireMessage::Line(_) => "ndjson",
        }
    }
}

/// Wire framing of a vendor's streaming transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sse,
    EventStream,
    Ndjson,
}

impl Framing {
    /// A fresh decoder for one stream.
    pub fn decoder(self) -> Box<dyn FrameDecoder> {
        match self {
            Framing::Sse => Box::new(SseDecoder::new()),
            Framing::EventStream => Box::new(EventStreamDecoder::new()),
            Framing::Ndjson => Box::new(NdjsonDecoder::new()),
        }
    }
}

/// Resumable decoder owning its leftover bytes.
pub trait FrameDecoder: Send {
    /// Decode the messages completed by `bytes`.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<WireMessage>, ClientError>;

    /// Handle end of input: flush or reject whatever is still buffered.
    fn finish(&mut self) -> Result<Vec<WireMessage>, ClientError>;
}

/// Normalization state for a single stream.
pub struct Pipeline {
    provider: &'static dyn Provider,
    model: String,
    options: StreamOptions,
    decoder: Box<dyn FrameDecoder>,
    chunks: Vec<StreamChunk>,
    metadata: TerminalMetadata,
    done: bool,
}

impl Pipeline {
    /// Create a pipeline for `provider`, decoding with its framing.
    pub fn new(provider: &'static dyn Provider, model: impl Into<String>, options: StreamOptions) -> Self {
        Self {
            provider,
            model: model.into(),
            options,
            decoder: provider.framing().decoder(),
            chunks: Vec::new(),
            metadata: TerminalMetadata::default(),
            done: false,
        }
    }

    /// Create a pipeline for a registered provider.
    pub fn for_provider(id: ProviderId, model: impl Into<String>, options: StreamOptions) -> Self {
        Self::new(providers::lookup(id), model, options)
    }

    /// Feed one network read; returns the chunks it completed.
    ///
    /// Bytes arriving after the terminal message are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>, ClientError> {
        if self.done {
            trace!(len = bytes.len(), "ignoring bytes after terminal message");
            return Ok(Vec::new());
        }
        let messages = self.decoder.feed(bytes)?;
        self.process(messages)
    }

    /// Signal end of input, flushing what the decoder still holds.
    pub fn end_of_input(&mut self) -> Result<Vec<StreamChunk>, ClientError> {
        if self.done {
            return Ok(Vec::new());
        }
        let messages = self.decoder.finish()?;
        let chunks = self.process(messages)?;
        self.done = true;
        Ok(chunks)
    }

    /// Whether the terminal message has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Content chunks accumulated so far, in emission order.
    pub fn chunks(&self) -> &[StreamChunk] {
        &self.chunks
    }

    /// Terminal metadata folded from the stream so far.
    pub fn metadata(&self) -> &TerminalMetadata {
        &self.metadata
    }

    /// Finish the stream and build the response merged into `context`.
    pub fn finish(mut self, context: Context) -> Result<Response, ClientError> {
        self.end_of_input()?;

        let merge_policy = self
            .options
            .merge_policy
            .unwrap_or_else(|| self.provider.merge_policy());
        let options = BuildOptions {
            model: self.model,
            context,
            merge_policy,
        };

        self.provider
            .build_response(&self.chunks, self.metadata, options)
    }

    fn process(&mut self, messages: Vec<WireMessage>) -> Result<Vec<StreamChunk>, ClientError> {
        let mut emitted = Vec::new();

        for message in messages {
            let terminal = self.provider.is_terminal(&message);

            match self.provider.classify(&message, &self.model) {
                Ok(chunks) => {
                    for chunk in &chunks {
                        self.record(chunk.clone());
                    }
                    emitted.extend(chunks);
                }
                Err(e) if e.is_message_error() && self.options.on_malformed == MalformedPolicy::Skip => {
                    warn!(provider = %self.provider.id(), kind = message.kind(), error = %e, "skipping malformed message");
                }
                Err(e) => return Err(e),
            }

            if terminal {
                debug!(provider = %self.provider.id(), chunks = self.chunks.len(), "terminal message received");
                self.done = true;
                break;
            }
        }

        Ok(emitted)
    }

    fn record(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Meta(meta) => {
                self.metadata = std::mem::take(&mut self.metadata).absorb(meta);
            }
            chunk => self.chunks.push(chunk),
        }
    }
}

/// Adapt a byte stream into a stream of chunks.
///
/// The stream ends after the terminal message, at end of input, or after
/// yielding the first error.
pub fn chunk_stream<S, E>(
    bytes: S,
    pipeline: Pipeline,
) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Into<ClientError>,
{
    stream::unfold(
        (Box::pin(bytes), pipeline, VecDeque::new(), false),
        |(mut bytes, mut pipeline, mut pending, mut ended)| async move {
            loop {
                if let Some(chunk) = pending.pop_front() {
                    return Some((Ok(chunk), (bytes, pipeline, pending, ended)));
                }
                if ended {
                    return None;
                }

                let next = if pipeline.is_done() {
                    None
                } else {
                    bytes.next().await
                };

                let result = match next {
                    Some(Ok(data)) => pipeline.feed(&data),
                    Some(Err(e)) => Err(e.into()),
                    None => {
                        ended = true;
                        pipeline.end_of_input()
                    }
                };

                match result {
                    Ok(chunks) => pending.extend(chunks),
                    Err(e) => {
                        ended = true;
                        pending.clear();
                        return Some((Err(e), (bytes, pipeline, pending, ended)));
                    }
                }
            }
        },
    )
}

/// Drive a byte stream to completion and build the response.
pub async fn collect<S, E>(
    bytes: S,
    mut pipeline: Pipeline,
    context: Context,
) -> Result<Response, ClientError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<ClientError>,
{
    futures::pin_mut!(bytes);

    while let Some(data) = bytes.next().await {
        pipeline.feed(&data.map_err(Into::into)?)?;
        if pipeline.is_done() {
            break;
        }
    }

    pipeline.finish(context)
}
