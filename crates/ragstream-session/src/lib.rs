pub mod error;
pub mod message;
pub mod session;
pub mod events;
pub mod controller;

pub use error::{Result, SessionError};
pub use message::{Message, MessageRole};
pub use session::{CitationSet, SessionSnapshot, SessionState, StreamSession};
pub use events::ConversationEvent;
pub use controller::{ChatController, INTERRUPTED_MARKER};
