use ragstream_client::{Citation, QueryMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;
use crate::session::SessionState;

/// Change notifications published by the controller.
///
/// Observers subscribe and re-render from these; the controller's own
/// accessors stay the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A message was added to the log
    MessageAppended {
        message: Message,
    },

    SessionStarted {
        session_id: Uuid,
        mode: QueryMode,
    },

    /// Text appended to the streaming assistant message. `offset` is the
    /// byte position of `text` within the session answer, so an observer
    /// that lagged can tell which deltas it already has.
    AnswerDelta {
        session_id: Uuid,
        offset: usize,
        text: String,
    },

    /// Citations seen for the first time in this session
    CitationsUpdated {
        session_id: Uuid,
        citations: Vec<Citation>,
    },

    AbortRequested {
        session_id: Uuid,
    },

    /// Session reached a terminal state
    SessionFinished {
        session_id: Uuid,
        state: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Log and error were reset
    Cleared,
}

impl ConversationEvent {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::AnswerDelta { session_id, .. }
            | Self::CitationsUpdated { session_id, .. }
            | Self::AbortRequested { session_id }
            | Self::SessionFinished { session_id, .. } => Some(*session_id),
            Self::MessageAppended { .. } | Self::Cleared => None,
        }
    }
}
