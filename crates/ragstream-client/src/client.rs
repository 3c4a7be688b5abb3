use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::streaming::{chunk_stream, ChunkStream};
use crate::traits::ChatTransport;
use crate::transport::{HttpTransport, TransportReader};
use crate::types::{QueryRequest, QueryResponse};

/// Entry point for talking to the chat service.
///
/// Cheap to clone; the transport is shared.
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Client backed by [`HttpTransport`]
    pub fn http(config: ClientConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Open the streaming endpoint and return its decoded events.
    ///
    /// Fails only if the request itself fails (non-2xx, not a stream,
    /// connection error). Cancelling `cancel` ends the returned stream with
    /// [`StreamEvent::Interrupted`](crate::StreamEvent::Interrupted).
    pub async fn stream_query(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream> {
        let reader = TransportReader::open(self.transport.as_ref(), request, cancel).await?;
        Ok(chunk_stream(reader))
    }

    /// Non-streaming fallback
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.transport.query(request).await
    }
}
