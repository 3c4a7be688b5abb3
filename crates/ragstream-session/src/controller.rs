use futures::StreamExt;
use ragstream_client::{
    CancellationToken, ChatClient, Chunk, FinishReason, QueryMode, QueryRequest, StreamError,
    StreamEvent,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::events::ConversationEvent;
use crate::message::Message;
use crate::session::{SessionSnapshot, SessionState, StreamSession};

/// Appended once to the partial answer of an aborted session.
pub const INTERRUPTED_MARKER: &str = "\n\n[interrupted]";

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct Conversation {
    messages: Vec<Message>,
    session: Option<StreamSession>,
    last_error: Option<String>,
}

impl Conversation {
    fn is_live(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state().is_live())
    }
}

/// How the network side of a session ended.
enum Outcome {
    Completed,
    Interrupted,
    Failed(StreamError),
}

/// Owns the conversation log and at most one live [`StreamSession`].
///
/// Clones share the same conversation, so one task can drive
/// [`send_message`](Self::send_message) while another calls
/// [`abort_stream`](Self::abort_stream). The lock is never held across an
/// `.await`.
#[derive(Clone)]
pub struct ChatController {
    client: ChatClient,
    conversation: Arc<Mutex<Conversation>>,
    events: broadcast::Sender<ConversationEvent>,
    top_k: Option<u32>,
}

impl ChatController {
    pub fn new(client: ChatClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            conversation: Arc::new(Mutex::new(Conversation::default())),
            events,
            top_k: None,
        }
    }

    /// `top_k` sent with every request
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Stream an answer for `query` into a new assistant message.
    ///
    /// `Err` means the message was rejected and nothing changed: a session
    /// is still live or the query is invalid. Failures of the exchange
    /// itself are recorded on the conversation (see
    /// [`last_error`](Self::last_error)) and reported through the returned
    /// snapshot's state.
    pub async fn send_message(
        &self,
        query: impl Into<String>,
        mode: QueryMode,
    ) -> Result<SessionSnapshot> {
        let request = self.build_request(query, mode)?;
        let (session_id, cancel) = self.begin(&request)?;
        let mut guard = FinishOnDrop::new(self, session_id);

        let outcome = self.drive(&request, session_id, cancel).await;

        guard.disarm();
        self.finish(session_id, outcome)
    }

    /// Same bookkeeping as [`send_message`](Self::send_message) but over the
    /// non-streaming endpoint; the answer lands in one piece.
    pub async fn query_once(
        &self,
        query: impl Into<String>,
        mode: QueryMode,
    ) -> Result<SessionSnapshot> {
        let request = self.build_request(query, mode)?;
        let (session_id, cancel) = self.begin(&request)?;
        let mut guard = FinishOnDrop::new(self, session_id);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Interrupted,
            result = self.client.query(&request) => match result {
                Ok(response) => {
                    self.apply_chunk(session_id, &Chunk::text(response.answer));
                    Outcome::Completed
                }
                Err(e) => Outcome::Failed(e),
            },
        };

        guard.disarm();
        self.finish(session_id, outcome)
    }

    /// Cancel the active session. Returns false when there is nothing to
    /// abort, including a session that is already aborting.
    pub fn abort_stream(&self) -> bool {
        let mut conversation = self.lock();
        let Some(session) = conversation.session.as_mut() else {
            return false;
        };
        if session.state() != SessionState::Active {
            return false;
        }
        if let Err(e) = session.request_abort() {
            warn!("Abort rejected: {}", e);
            return false;
        }

        info!(session_id = %session.id(), "Abort requested");
        self.emit(ConversationEvent::AbortRequested {
            session_id: session.id(),
        });
        true
    }

    /// Reset the log, the last error and the finished session.
    pub fn clear_messages(&self) -> Result<()> {
        let mut conversation = self.lock();
        if conversation.is_live() {
            return Err(SessionError::SessionActive);
        }

        conversation.messages.clear();
        conversation.session = None;
        conversation.last_error = None;
        debug!("Conversation cleared");
        self.emit(ConversationEvent::Cleared);
        Ok(())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Snapshot of the current or most recent session
    pub fn session(&self) -> Option<SessionSnapshot> {
        self.lock().session.as_ref().map(StreamSession::snapshot)
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().is_live()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    fn build_request(&self, query: impl Into<String>, mode: QueryMode) -> Result<QueryRequest> {
        let mut request = QueryRequest::new(query, mode);
        if let Some(top_k) = self.top_k {
            request = request.with_top_k(top_k);
        }
        request.validate()?;
        Ok(request)
    }

    /// Claim the session slot and append the user/assistant pair.
    fn begin(&self, request: &QueryRequest) -> Result<(Uuid, CancellationToken)> {
        let mut conversation = self.lock();
        if conversation.is_live() {
            debug!("Message rejected, session still live");
            return Err(SessionError::SessionActive);
        }

        let user = Message::user(request.query.clone());
        let assistant = Message::assistant("");
        let mut session = StreamSession::new(assistant.id);
        session.start()?;

        let session_id = session.id();
        let cancel = session.cancel_token();

        conversation.last_error = None;
        conversation.messages.push(user.clone());
        conversation.messages.push(assistant.clone());
        conversation.session = Some(session);

        self.emit(ConversationEvent::MessageAppended { message: user });
        self.emit(ConversationEvent::MessageAppended { message: assistant });
        self.emit(ConversationEvent::SessionStarted {
            session_id,
            mode: request.mode,
        });
        info!(%session_id, mode = %request.mode, "Session started");

        Ok((session_id, cancel))
    }

    async fn drive(
        &self,
        request: &QueryRequest,
        session_id: Uuid,
        cancel: CancellationToken,
    ) -> Outcome {
        let mut stream = match self.client.stream_query(request, cancel).await {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e),
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Chunk(chunk)) => self.apply_chunk(session_id, &chunk),
                Ok(StreamEvent::Finished(reason)) => {
                    if reason == FinishReason::EndOfStream {
                        debug!(%session_id, "Stream closed without sentinel");
                    }
                    return Outcome::Completed;
                }
                Ok(StreamEvent::Interrupted) => return Outcome::Interrupted,
                Err(e) => return Outcome::Failed(e),
            }
        }

        Outcome::Completed
    }

    /// Fold one chunk into the session and mirror it into the assistant
    /// message.
    fn apply_chunk(&self, session_id: Uuid, chunk: &Chunk) {
        let mut guard = self.lock();
        let conversation = &mut *guard;

        let Some(session) = conversation
            .session
            .as_mut()
            .filter(|s| s.id() == session_id)
        else {
            warn!(%session_id, "Chunk for unknown session dropped");
            return;
        };

        let offset = session.answer().len();
        let added = match session.apply(chunk) {
            Ok(added) => added,
            Err(e) => {
                warn!(%session_id, "Chunk dropped: {}", e);
                return;
            }
        };

        let message_id = session.message_id();
        if let Some(message) = conversation.messages.iter_mut().rev().find(|m| m.id == message_id) {
            message.content.push_str(&chunk.text);
            if !added.is_empty() {
                message.citations = Some(session.citations().as_slice().to_vec());
            }
        }

        if !chunk.text.is_empty() {
            self.emit(ConversationEvent::AnswerDelta {
                session_id,
                offset,
                text: chunk.text.clone(),
            });
        }
        if !added.is_empty() {
            self.emit(ConversationEvent::CitationsUpdated {
                session_id,
                citations: added,
            });
        }
    }

    /// Move the session to its terminal state and release the slot.
    fn finish(&self, session_id: Uuid, outcome: Outcome) -> Result<SessionSnapshot> {
        let mut guard = self.lock();
        let conversation = &mut *guard;

        let Some(session) = conversation
            .session
            .as_mut()
            .filter(|s| s.id() == session_id)
        else {
            return Err(SessionError::IllegalTransition {
                from: SessionState::Idle,
                to: SessionState::Completed,
            });
        };

        let aborting = session.state() == SessionState::Aborting;
        let outcome = match outcome {
            // An error after abort was requested is the cancellation surfacing.
            Outcome::Failed(e) if aborting => {
                debug!(%session_id, "Error after abort: {}", e);
                Outcome::Interrupted
            }
            Outcome::Completed if aborting => Outcome::Interrupted,
            other => other,
        };

        let message = conversation
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == session.message_id());

        let error = match outcome {
            Outcome::Completed => {
                session.complete()?;
                info!(%session_id, "Session completed");
                None
            }
            Outcome::Interrupted => {
                if session.state() == SessionState::Active {
                    session.request_abort()?;
                }
                session.complete()?;
                if let Some(message) = message {
                    message.content.push_str(INTERRUPTED_MARKER);
                }
                info!(%session_id, "Session interrupted");
                None
            }
            Outcome::Failed(e) => {
                session.fail()?;
                error!(%session_id, "Session failed: {}", e);
                if let Some(message) = message {
                    message.content = format!("Error: {}", e);
                }
                let text = e.to_string();
                conversation.last_error = Some(text.clone());
                Some(text)
            }
        };

        self.emit(ConversationEvent::SessionFinished {
            session_id,
            state: session.state(),
            error,
        });

        Ok(session.snapshot())
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Interrupts the session if the driving future is dropped mid-flight.
struct FinishOnDrop<'a> {
    controller: &'a ChatController,
    session_id: Uuid,
    armed: bool,
}

impl<'a> FinishOnDrop<'a> {
    fn new(controller: &'a ChatController, session_id: Uuid) -> Self {
        Self {
            controller,
            session_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(session_id = %self.session_id, "Session dropped while live");
            let _ = self.controller.finish(self.session_id, Outcome::Interrupted);
        }
    }
}
