use async_trait::async_trait;
use bytes::Bytes;
use ragstream_client::{
    ByteStream, ChatClient, ChatTransport, ClientConfig, QueryMode, QueryRequest, QueryResponse,
    RequestError, StreamError,
};
use ragstream_session::{
    ChatController, ConversationEvent, MessageRole, SessionError, SessionState, INTERRUPTED_MARKER,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const DONE: &str = "data: [DONE]\n\n";

fn chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "text": text, "citations": [], "is_final": false })
    )
}

fn cited(text: &str, chunk_id: &str, score: f64) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "text": text,
            "citations": [{
                "doc_id": 1,
                "filename": "heat.pdf",
                "chunk_id": chunk_id,
                "score": score,
                "content_preview": "Urban heat islands..."
            }],
            "is_final": false
        })
    )
}

/// Split `body` into reads at the given byte offsets.
fn reads(body: &str, cuts: &[usize]) -> Vec<Bytes> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        parts.push(Bytes::copy_from_slice(&bytes[start..cut]));
        start = cut;
    }
    parts.push(Bytes::copy_from_slice(&bytes[start..]));
    parts
}

enum Reply {
    Body(Vec<Bytes>),
    Fail(StreamError),
}

/// Answers each open with the next scripted reply.
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    answer: Option<String>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            answer: None,
        }
    }

    fn with_answer(answer: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            answer: Some(answer.to_string()),
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, _request: &QueryRequest) -> ragstream_client::Result<ByteStream> {
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Body(parts)) => Ok(Box::pin(futures::stream::iter(
                parts.into_iter().map(Ok::<Bytes, StreamError>),
            ))),
            Some(Reply::Fail(err)) => Err(err),
            None => Err(StreamError::Unknown("no scripted reply".to_string())),
        }
    }

    async fn query(&self, request: &QueryRequest) -> ragstream_client::Result<QueryResponse> {
        match &self.answer {
            Some(answer) => Ok(QueryResponse {
                answer: answer.clone(),
                mode: request.mode.to_string(),
            }),
            None => Err(StreamError::Transport {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }
}

/// Body fed by the test through a channel so reads can be timed exactly.
struct ChannelTransport {
    body: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

fn channel_controller() -> (ChatController, mpsc::UnboundedSender<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = ChannelTransport {
        body: Mutex::new(Some(rx)),
    };
    (ChatController::new(ChatClient::new(Arc::new(transport))), tx)
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn open_stream(&self, _request: &QueryRequest) -> ragstream_client::Result<ByteStream> {
        let rx = self
            .body
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StreamError::Unknown("stream already opened".to_string()))?;
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|bytes| (Ok::<Bytes, StreamError>(bytes), rx))
        })))
    }

    async fn query(&self, _request: &QueryRequest) -> ragstream_client::Result<QueryResponse> {
        Err(StreamError::Unknown("not supported".to_string()))
    }
}

fn scripted(replies: Vec<Reply>) -> ChatController {
    ChatController::new(ChatClient::new(Arc::new(ScriptedTransport::new(replies))))
}

async fn wait_for(
    events: &mut broadcast::Receiver<ConversationEvent>,
    pred: impl Fn(&ConversationEvent) -> bool,
) -> ConversationEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_content_fidelity_across_reads() {
    let body = [chunk("Heat "), chunk("islands "), chunk("warm cities ☀"), DONE.to_string()].concat();
    // Cuts land mid-line and inside the multi-byte sun.
    let sun = body.find('☀').unwrap();
    let controller = scripted(vec![Reply::Body(reads(&body, &[3, 21, 22, sun + 1]))]);

    let snapshot = controller
        .send_message("Why are cities warmer?", QueryMode::Hybrid)
        .await
        .unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.answer, "Heat islands warm cities ☀");

    let messages = controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "Why are cities warmer?");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Heat islands warm cities ☀");
    assert!(controller.last_error().is_none());
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn test_citations_deduplicated_first_seen_wins() {
    let body = [
        cited("A ", "c1", 0.9),
        cited("B ", "c1", 0.2),
        cited("C", "c2", 0.5),
        DONE.to_string(),
    ]
    .concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);

    let snapshot = controller.send_message("q", QueryMode::Local).await.unwrap();

    let ids: Vec<_> = snapshot.citations.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(snapshot.citations[0].score, 0.9);

    let assistant = &controller.messages()[1];
    assert_eq!(assistant.content, "A B C");
    assert_eq!(assistant.citations.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn test_sentinel_ends_session_and_ignores_rest() {
    let body = [chunk("Done."), DONE.to_string(), chunk(" ignored")].concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);

    let snapshot = controller.send_message("q", QueryMode::Naive).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(controller.messages()[1].content, "Done.");
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn test_transport_error_then_next_send_succeeds() {
    let controller = scripted(vec![
        Reply::Fail(StreamError::Transport {
            status: 500,
            body: "Internal error".to_string(),
        }),
        Reply::Body(vec![Bytes::from([chunk("Recovered"), DONE.to_string()].concat())]),
    ]);

    let snapshot = controller.send_message("first", QueryMode::Hybrid).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Errored);
    assert!(!controller.is_streaming());

    let error = controller.last_error().unwrap();
    assert!(error.contains("500"));
    assert!(error.contains("Internal error"));
    assert!(controller.messages()[1].content.contains("Internal error"));

    let snapshot = controller.send_message("second", QueryMode::Hybrid).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert!(controller.last_error().is_none());

    let messages = controller.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3].content, "Recovered");
}

#[tokio::test]
async fn test_server_error_frame_fails_session() {
    let body = [
        chunk("Partial"),
        "event: error\ndata: {\"error\":\"index unavailable\",\"type\":\"error\"}\n\n".to_string(),
    ]
    .concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);

    let snapshot = controller.send_message("q", QueryMode::Global).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Errored);
    assert!(controller.last_error().unwrap().contains("index unavailable"));
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let body = [
        chunk("Before "),
        "data: {not json}\n\n".to_string(),
        chunk("after"),
        DONE.to_string(),
    ]
    .concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);

    let snapshot = controller.send_message("q", QueryMode::Hybrid).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.answer, "Before after");
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn test_bad_citation_keeps_answer_text() {
    let body = [
        chunk("Shade "),
        cited("lowers ", "bad-score", 4.0),
        cited("temperatures.", "c1", 0.6),
        DONE.to_string(),
    ]
    .concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);

    let snapshot = controller.send_message("q", QueryMode::Hybrid).await.unwrap();

    assert_eq!(snapshot.answer, "Shade lowers temperatures.");
    let ids: Vec<_> = snapshot.citations.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["c1"]);
}

#[tokio::test]
async fn test_second_send_rejected_while_streaming() {
    let (controller, body) = channel_controller();
    let mut events = controller.subscribe();

    let driver = controller.clone();
    let handle = tokio::spawn(async move { driver.send_message("first", QueryMode::Hybrid).await });

    wait_for(&mut events, |e| matches!(e, ConversationEvent::SessionStarted { .. })).await;
    assert!(controller.is_streaming());

    let rejected = controller.send_message("second", QueryMode::Hybrid).await;
    assert_eq!(rejected.unwrap_err(), SessionError::SessionActive);
    assert_eq!(controller.clear_messages(), Err(SessionError::SessionActive));
    assert_eq!(controller.messages().len(), 2);

    body.send(Bytes::from(chunk("ok"))).unwrap();
    body.send(Bytes::from(DONE)).unwrap();

    let snapshot = handle.await.unwrap().unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.messages()[1].content, "ok");
}

#[tokio::test]
async fn test_abort_mid_stream_keeps_partial_answer() {
    let (controller, body) = channel_controller();
    let mut events = controller.subscribe();

    let driver = controller.clone();
    let handle = tokio::spawn(async move { driver.send_message("q", QueryMode::Hybrid).await });

    body.send(Bytes::from(chunk("partial "))).unwrap();
    wait_for(&mut events, |e| matches!(e, ConversationEvent::AnswerDelta { .. })).await;

    assert!(controller.abort_stream());
    assert!(!controller.abort_stream());

    // Arrives after the abort; must never be applied.
    let _ = body.send(Bytes::from(chunk("more")));
    let _ = body.send(Bytes::from(DONE));

    let snapshot = handle.await.unwrap().unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.answer, "partial ");

    let content = controller.messages()[1].content.clone();
    assert_eq!(content, format!("partial {}", INTERRUPTED_MARKER));
    assert_eq!(content.matches(INTERRUPTED_MARKER).count(), 1);
    assert!(controller.last_error().is_none());
    assert!(!controller.is_streaming());

    let finished = wait_for(&mut events, |e| {
        matches!(e, ConversationEvent::SessionFinished { .. })
    })
    .await;
    assert!(matches!(
        finished,
        ConversationEvent::SessionFinished {
            state: SessionState::Completed,
            error: None,
            ..
        }
    ));
}

#[tokio::test]
async fn test_dropped_send_releases_session() {
    let (controller, _body) = channel_controller();
    let mut events = controller.subscribe();

    let driver = controller.clone();
    let handle = tokio::spawn(async move { driver.send_message("q", QueryMode::Hybrid).await });
    wait_for(&mut events, |e| matches!(e, ConversationEvent::SessionStarted { .. })).await;

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert!(!controller.is_streaming());
    assert!(controller.messages()[1].content.ends_with(INTERRUPTED_MARKER));
    assert!(controller.clear_messages().is_ok());
}

#[tokio::test]
async fn test_clear_after_finish() {
    let controller = scripted(vec![Reply::Fail(StreamError::Protocol(
        "Unexpected content type".to_string(),
    ))]);
    controller.send_message("q", QueryMode::Hybrid).await.unwrap();
    assert!(controller.last_error().is_some());

    let mut events = controller.subscribe();
    controller.clear_messages().unwrap();

    assert!(controller.messages().is_empty());
    assert!(controller.session().is_none());
    assert!(controller.last_error().is_none());
    assert!(matches!(events.recv().await.unwrap(), ConversationEvent::Cleared));
}

#[tokio::test]
async fn test_invalid_query_is_noop() {
    let controller = scripted(vec![]);

    let err = controller.send_message("   ", QueryMode::Hybrid).await.unwrap_err();
    assert_eq!(err, SessionError::InvalidQuery(RequestError::EmptyQuery));

    let long = "x".repeat(2001);
    let err = controller.send_message(long, QueryMode::Hybrid).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidQuery(RequestError::QueryTooLong(_))));

    assert!(controller.messages().is_empty());
    assert!(controller.session().is_none());
}

#[tokio::test]
async fn test_query_once_uses_fallback() {
    let controller = ChatController::new(ChatClient::new(Arc::new(
        ScriptedTransport::with_answer("Cities store heat."),
    )));

    let snapshot = controller.query_once("why?", QueryMode::Global).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    let messages = controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Cities store heat.");
}

#[tokio::test]
async fn test_query_once_failure_recorded() {
    let controller = scripted(vec![]);

    let snapshot = controller.query_once("why?", QueryMode::Global).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Errored);
    assert!(controller.last_error().unwrap().contains("503"));
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let body = [
        cited("Asphalt absorbs heat", "c7", 0.81),
        chunk(", vegetation cools."),
        DONE.to_string(),
    ]
    .concat();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/chat/stream")
        .match_body(mockito::Matcher::PartialJson(json!({ "mode": "naive", "top_k": 3 })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let client = ChatClient::http(ClientConfig::new(server.url())).unwrap();
    let controller = ChatController::new(client).with_top_k(3);

    let snapshot = controller
        .send_message("What cools a city?", QueryMode::Naive)
        .await
        .unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.answer, "Asphalt absorbs heat, vegetation cools.");
    assert_eq!(snapshot.citations[0].chunk_id, "c7");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_delta_offsets_tile_the_answer() {
    let body = [chunk("Trees "), chunk(""), chunk("cool ☀ "), chunk("streets."), DONE.to_string()].concat();
    let controller = scripted(vec![Reply::Body(vec![Bytes::from(body)])]);
    let mut events = controller.subscribe();

    let snapshot = controller.send_message("q", QueryMode::Naive).await.unwrap();

    let mut rebuilt = String::new();
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::AnswerDelta { offset, text, .. } = event {
            assert_eq!(offset, rebuilt.len());
            rebuilt.push_str(&text);
        }
    }
    assert_eq!(rebuilt, snapshot.answer);
    assert_eq!(rebuilt, "Trees cool ☀ streets.");
}
