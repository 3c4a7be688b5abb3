//! Prelude module for convenient imports
//!
//! ```rust
//! use ragstream::prelude::*;
//! ```

pub use crate::{
    CancellationToken, ChatClient, ChatController, ChatTransport, Chunk, Citation, ClientConfig,
    ConversationEvent, Message, MessageRole, QueryMode, QueryRequest, SessionError,
    SessionSnapshot, SessionState, StreamError, StreamEvent,
};
