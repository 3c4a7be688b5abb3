use chrono::{DateTime, Utc};
use ragstream_client::{Chunk, Citation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SessionError};

/// Lifecycle of one streaming exchange.
///
/// `Idle → Active → {Completed | Errored | Aborting → Completed}`; never
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    Aborting,
    Completed,
    Errored,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Active)
                | (Active, Completed)
                | (Active, Errored)
                | (Active, Aborting)
                | (Aborting, Completed)
        )
    }

    /// Holds the conversation's single streaming slot.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Aborting)
    }
}

/// Citations keyed by `chunk_id`; the first occurrence wins and arrival
/// order is kept.
#[derive(Debug, Clone, Default)]
pub struct CitationSet {
    ordered: Vec<Citation>,
    seen: HashSet<String>,
}

impl CitationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge and return the citations that were not seen before.
    pub fn merge<'a>(&mut self, citations: impl IntoIterator<Item = &'a Citation>) -> Vec<Citation> {
        let mut added = Vec::new();
        for citation in citations {
            if self.seen.insert(citation.chunk_id.clone()) {
                self.ordered.push(citation.clone());
                added.push(citation.clone());
            }
        }
        added
    }

    pub fn as_slice(&self) -> &[Citation] {
        &self.ordered
    }
}

/// One streaming exchange bound to a single assistant message.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    message_id: Uuid,
    state: SessionState,
    answer: String,
    citations: CitationSet,
    cancel: CancellationToken,
    chunks_applied: usize,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    /// New idle session writing into the assistant message `message_id`.
    pub fn new(message_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            state: SessionState::Idle,
            answer: String::new(),
            citations: CitationSet::new(),
            cancel: CancellationToken::new(),
            chunks_applied: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(SessionState::Active)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Fold a chunk into the answer. Returns the newly seen citations.
    ///
    /// Chunks are accepted while Aborting: they were read before the
    /// cancellation was observed.
    pub fn apply(&mut self, chunk: &Chunk) -> Result<Vec<Citation>> {
        if !self.state.is_live() {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: self.state,
            });
        }
        self.answer.push_str(&chunk.text);
        self.chunks_applied += 1;
        Ok(self.citations.merge(&chunk.citations))
    }

    /// Signal the cancellation token. Only an Active session can abort.
    pub fn request_abort(&mut self) -> Result<()> {
        self.transition(SessionState::Aborting)?;
        self.cancel.cancel();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.finish(SessionState::Completed)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.finish(SessionState::Errored)
    }

    fn finish(&mut self, state: SessionState) -> Result<()> {
        self.transition(state)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn citations(&self) -> &CitationSet {
        &self.citations
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state,
            answer: self.answer.clone(),
            citations: self.citations.as_slice().to_vec(),
            chunks_applied: self.chunks_applied,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only copy of a session for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: SessionState,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub chunks_applied: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
