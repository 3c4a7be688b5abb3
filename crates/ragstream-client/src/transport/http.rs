// reqwest-backed transport for the chat service

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Response;

use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use crate::traits::{ByteStream, ChatTransport};
use crate::types::{QueryRequest, QueryResponse};

const EVENT_STREAM: &str = "text/event-stream";

/// HTTP client (reqwest, no SDK)
pub struct HttpTransport {
    http_client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| StreamError::Unknown(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read the complete body of a failed response.
    async fn into_transport_error(response: Response) -> StreamError {
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(status, error = %e, "Failed to read error response body");
                String::new()
            }
        };
        tracing::error!(status, body = %body, "Chat request rejected");
        StreamError::Transport { status, body }
    }

    /// A success response must be readable as an event stream.
    fn ensure_streamable(response: &Response) -> Result<()> {
        let Some(value) = response.headers().get(CONTENT_TYPE) else {
            return Ok(());
        };
        let content_type = value.to_str().unwrap_or_default();
        if content_type.starts_with(EVENT_STREAM) || content_type.starts_with("text/plain") {
            Ok(())
        } else {
            Err(StreamError::Protocol(format!(
                "Expected {} response, got '{}'",
                EVENT_STREAM, content_type
            )))
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: &QueryRequest) -> Result<ByteStream> {
        let url = self.config.stream_url();
        tracing::debug!(url = %url, mode = %request.mode, "Opening chat stream");

        let response = self
            .http_client
            .post(&url)
            .header(ACCEPT, EVENT_STREAM)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_transport_error(response).await);
        }
        Self::ensure_streamable(&response)?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::Unknown(format!("Stream read error: {}", e))));

        Ok(Box::pin(stream))
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let url = self.config.query_url();
        tracing::debug!(url = %url, mode = %request.mode, "Sending synchronous query");

        let response = self.http_client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(Self::into_transport_error(response).await);
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| StreamError::Unknown(format!("Failed to parse query response: {}", e)))
    }
}
