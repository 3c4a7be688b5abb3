use serde::Deserialize;

use crate::types::Chunk;

pub const DATA_PREFIX: &str = "data:";
pub const EVENT_PREFIX: &str = "event:";
pub const DONE_SENTINEL: &str = "[DONE]";

const ERROR_EVENT: &str = "error";
const PAYLOAD_LOG_LIMIT: usize = 120;

/// Result of decoding one payload line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Chunk(Chunk),
    /// The `[DONE]` sentinel. Nothing after it is decoded.
    Done,
    /// In-band `event: error` frame emitted by the producer
    ServerError(String),
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

/// Turns frames into decoded chunks.
///
/// Each `data:` line is parsed on its own; multi-line payloads are not
/// joined. A payload that fails validation is logged and skipped.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    finished: bool,
    skipped: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_frame(&mut self, frame: &str) -> Vec<Decoded> {
        let mut decoded = Vec::new();
        if self.finished {
            return decoded;
        }

        let mut event: Option<&str> = None;

        for line in frame.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);

            if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
                event = Some(name.trim());
                continue;
            }

            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let payload = payload.trim();

            if payload == DONE_SENTINEL {
                self.finished = true;
                decoded.push(Decoded::Done);
                return decoded;
            }

            if event == Some(ERROR_EVENT) {
                self.finished = true;
                decoded.push(Decoded::ServerError(Self::error_message(payload)));
                return decoded;
            }

            match Chunk::parse(payload) {
                Ok(chunk) => decoded.push(Decoded::Chunk(chunk)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(
                        error = %e,
                        payload = %truncate(payload, PAYLOAD_LOG_LIMIT),
                        "Skipping malformed stream payload"
                    );
                }
            }
        }

        decoded
    }

    /// True once the sentinel or an error event has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of payloads discarded as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn error_message(payload: &str) -> String {
        serde_json::from_str::<ErrorPayload>(payload)
            .map(|p| p.error)
            .unwrap_or_else(|_| payload.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
