//! Glue between `reqwest` responses and the normalization pipeline.
//!
//! The library never opens connections itself. Callers send the request with
//! their own `reqwest::Client` and hand the response over here.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::warn;

use crate::client::{ClientError, Provider};
use crate::context::Context;
use crate::model::{Response, StreamChunk};
use crate::options::StreamOptions;
use crate::stream::{chunk_stream, collect, Pipeline};

/// Extension trait to normalize a streaming `reqwest::Response`.
///
/// # Example
/// ```ignore
/// let response = http_client.post(url).json(&body).send().await?;
/// let response = response
///     .normalize(providers::lookup(ProviderId::Anthropic), "claude-sonnet-4-5", StreamOptions::new(), context)
///     .await?;
/// println!("{}", response.text());
/// ```
#[async_trait]
pub trait ResponseExt: Sized {
    /// Reject a non-2xx status before any body byte reaches a pipeline.
    async fn ensure_success(self) -> Result<Self, ClientError>;

    /// Run the whole body through a pipeline and build the response.
    ///
    /// A non-2xx status fails with `ClientError::Api` before any body byte is decoded.
    async fn normalize(
        self,
        provider: &'static dyn Provider,
        model: &str,
        options: StreamOptions,
        context: Context,
    ) -> Result<Response, ClientError>;

    /// Stream canonical chunks as the body arrives.
    ///
    /// A non-2xx status yields a single `ClientError::Api` item.
    fn chunks(
        self,
        provider: &'static dyn Provider,
        model: &str,
        options: StreamOptions,
    ) -> BoxStream<'static, Result<StreamChunk, ClientError>>;
}

#[async_trait]
impl ResponseExt for reqwest::Response {
    async fn ensure_success(self) -> Result<Self, ClientError> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(api_error(self).await)
        }
    }

    async fn normalize(
        self,
        provider: &'static dyn Provider,
        model: &str,
        options: StreamOptions,
        context: Context,
    ) -> Result<Response, ClientError> {
        let response = self.ensure_success().await?;
        let pipeline = Pipeline::new(provider, model, options);
        collect(response.bytes_stream(), pipeline, context).await
    }

    fn chunks(
        self,
        provider: &'static dyn Provider,
        model: &str,
        options: StreamOptions,
    ) -> BoxStream<'static, Result<StreamChunk, ClientError>> {
        if !self.status().is_success() {
            return stream::once(api_error(self)).map(Err).boxed();
        }

        let pipeline = Pipeline::new(provider, model, options);
        chunk_stream(self.bytes_stream(), pipeline).boxed()
    }
}

/// Turn a non-2xx response into `ClientError::Api`, keeping whatever body it carried.
async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("<error body unreadable: {e}>"),
    };

    warn!(status, "streaming request failed");
    ClientError::Api { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FinishReason;
    use crate::providers::{self, ProviderId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve(status: &str, content_type: &str, body: &'static str) -> String {
        serve_with_length(status, content_type, body, body.len()).await
    }

    /// Like `serve`, but announce `length` bytes whatever the body holds.
    async fn serve_with_length(
        status: &str,
        content_type: &str,
        body: &'static str,
        length: usize,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let head = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {length}\r\nconnection: close\r\n\r\n"
        );

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{addr}/stream")
    }

    async fn get(url: &str) -> reqwest::Response {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        client.get(url).send().await.unwrap()
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_api_error() {
        let url = serve("429 Too Many Requests", "application/json", r#"{"error":"slow down"}"#).await;
        let response = get(&url).await;

        match response.ensure_success().await {
            Err(ClientError::Api { status, body }) => {
                assert_eq!(status, 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_normalize_rejects_error_status() {
        let url = serve("503 Service Unavailable", "application/x-ndjson", "{\"error\":\"model overloaded\"}\n").await;

        let result = get(&url)
            .await
            .normalize(
                providers::lookup(ProviderId::Ollama),
                "llama3.2",
                StreamOptions::new(),
                Context::default(),
            )
            .await;

        match result {
            Err(ClientError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert!(body.contains("model overloaded"));
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunks_yield_one_api_error_on_error_status() {
        let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n";
        let url = serve("500 Internal Server Error", "text/event-stream", body).await;

        let chunks: Vec<_> = get(&url)
            .await
            .chunks(providers::lookup(ProviderId::OpenRouter), "m", StreamOptions::new())
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], Err(ClientError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_unreadable_error_body_is_reported() {
        let url = serve_with_length("502 Bad Gateway", "text/plain", "cut", 64).await;

        match get(&url).await.ensure_success().await {
            Err(ClientError::Api { status, body }) => {
                assert_eq!(status, 502);
                assert!(body.starts_with("<error body unreadable"), "body was {body:?}");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_normalize_body() {
        let body = concat!(
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"Hi \"},\"done\":false}\n",
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"there\"},\"done\":false}\n",
            "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":3,\"eval_count\":2}\n",
        );
        let url = serve("200 OK", "application/x-ndjson", body).await;

        let response = get(&url)
            .await
            .ensure_success()
            .await
            .unwrap()
            .normalize(
                providers::lookup(ProviderId::Ollama),
                "llama3.2",
                StreamOptions::new(),
                Context::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.text(), "Hi there");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(5));
    }

    #[tokio::test]
    async fn test_chunks() {
        let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
        let url = serve("200 OK", "text/event-stream", body).await;

        let chunks: Vec<_> = get(&url)
            .await
            .chunks(providers::lookup(ProviderId::OpenRouter), "m", StreamOptions::new())
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::text("ok"));
    }
}
