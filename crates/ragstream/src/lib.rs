//! # Ragstream
//!
//! Streaming chat client for retrieval-augmented generation services that
//! answer over Server-Sent Events and attach source citations to the text.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragstream::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ChatClient::http(ClientConfig::new("http://localhost:8000"))?;
//!     let controller = ChatController::new(client);
//!
//!     let mut events = controller.subscribe();
//!     let printer = tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ConversationEvent::AnswerDelta { text, .. } = event {
//!                 print!("{}", text);
//!             }
//!         }
//!     });
//!
//!     let session = controller
//!         .send_message("What causes urban heat islands?", QueryMode::Hybrid)
//!         .await?;
//!     println!("\n{} sources", session.citations.len());
//!
//!     printer.abort();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`ragstream-client`**: HTTP transport, incremental UTF-8 decoding, SSE
//!   framing and chunk decoding, exposed as a cancellable `Stream`
//! - **`ragstream-session`**: conversation log, session state machine and
//!   the `ChatController` that drives one stream at a time
//!
//! ## License
//!
//! MIT

pub mod prelude;

pub use ragstream_client::{
    chunk_stream, ByteStream, CancellationToken, ChatClient, ChatTransport, Chunk, ChunkStream,
    Citation, ClientConfig, DecodeError, FinishReason, HttpTransport, QueryMode, QueryRequest,
    QueryResponse, RequestError, StreamError, StreamEvent,
};

pub use ragstream_session::{
    ChatController, CitationSet, ConversationEvent, Message, MessageRole, SessionError,
    SessionSnapshot, SessionState, StreamSession, INTERRUPTED_MARKER,
};
