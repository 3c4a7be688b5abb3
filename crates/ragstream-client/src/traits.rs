use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::types::{QueryRequest, QueryResponse};

/// Raw response body, one item per network read
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Network seam of the pipeline.
///
/// Implementations must fail with [`StreamError::Transport`] on non-2xx
/// responses (after reading the full body) and never hand back a stream in
/// that case.
///
/// [`StreamError::Transport`]: crate::StreamError::Transport
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Issue the streaming request and expose the body incrementally
    async fn open_stream(&self, request: &QueryRequest) -> Result<ByteStream>;

    /// Synchronous fallback: the whole answer in one response
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse>;
}
