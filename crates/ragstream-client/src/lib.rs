pub mod types;
pub mod error;
pub mod config;
pub mod traits;
pub mod buffer_utils;
pub mod transport;
pub mod streaming;
pub mod client;

pub use error::{DecodeError, RequestError, Result, StreamError};
pub use config::ClientConfig;
pub use traits::{ByteStream, ChatTransport};
pub use types::{Chunk, Citation, QueryMode, QueryRequest, QueryResponse};
pub use buffer_utils::{ChunkDecoder, Decoded, FrameBuffer, Utf8Decoder};
pub use transport::{HttpTransport, TransportReader};
pub use streaming::{chunk_stream, ChunkStream, FinishReason, StreamEvent};
pub use client::ChatClient;

/// Re-exported so callers can build and cancel sessions without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
