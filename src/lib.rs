//! # unai-stream - Streaming response normalization for LLM clients
//!
//! A small, pragmatic Rust library that turns the raw streaming bodies of
//! heterogeneous LLM vendors into one provider-agnostic [`Response`].
//!
//! ## Features
//! - Binary AWS event-stream, Server-Sent Events and NDJSON framing
//! - Resumable decoders: network reads may split anywhere, even inside a UTF-8 character
//! - Stateless per-vendor classifiers behind the [`Provider`] trait
//! - A pure response builder with composable vendor quirk hooks
//! - Immutable conversation contexts with an explicit merge policy
//!
//! ## Architecture
//!
//! Data flows one way:
//!
//! 1. **Frame decoding** (`eventstream`, `sse`, `ndjson`): bytes to protocol messages
//! 2. **Classification** ([`Provider::classify`]): protocol messages to [`StreamChunk`]s
//! 3. **Building** (`builder`): the chunk sequence to a [`Response`] merged into a [`Context`]
//!
//! [`Pipeline`] drives all three for one stream; `http::ResponseExt` runs it over a
//! `reqwest::Response` body.
//!
//! ## Example
//! ```rust
//! use unai_stream::context::Context;
//! use unai_stream::options::StreamOptions;
//! use unai_stream::providers::ProviderId;
//! use unai_stream::stream::Pipeline;
//!
//! let body = concat!(
//!     "event: message_start\n",
//!     "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude\",\"usage\":{\"input_tokens\":3}}}\n\n",
//!     "event: content_block_delta\n",
//!     "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
//!     "event: message_delta\n",
//!     "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
//!     "event: message_stop\n",
//!     "data: {\"type\":\"message_stop\"}\n\n",
//! );
//!
//! let mut pipeline = Pipeline::for_provider(ProviderId::Anthropic, "claude", StreamOptions::new());
//! for read in body.as_bytes().chunks(16) {
//!     pipeline.feed(read)?;
//! }
//!
//! let response = pipeline.finish(Context::default())?;
//! assert_eq!(response.text(), "Hello");
//! assert_eq!(response.id, "msg_1");
//! assert_eq!(response.context.len(), 1);
//! # Ok::<(), unai_stream::ClientError>(())
//! ```

pub mod builder;
pub mod client;
pub mod context;
pub mod eventstream;
pub mod http;
pub mod model;
pub mod ndjson;
pub mod options;
pub mod providers;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{ClientError, Provider};
pub use context::{Context, MergePolicy};
pub use http::ResponseExt;
pub use model::{Message, Response, StreamChunk};
pub use options::StreamOptions;
pub use providers::ProviderId;
pub use stream::Pipeline;
