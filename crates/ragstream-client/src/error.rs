use thiserror::Error;

/// Failures that terminate a streaming exchange.
///
/// Decode-level problems never show up here; they are handled inside the
/// chunk decoder (see [`DecodeError`]). Cancellation is not a failure: it
/// ends the stream with [`StreamEvent::Interrupted`](crate::StreamEvent::Interrupted).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Non-2xx response. `body` is the complete response text.
    #[error("Request failed with status {status}: {body}")]
    Transport { status: u16, body: String },

    /// The response cannot be consumed as an incremental event stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The producer sent an in-band `event: error` frame.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl StreamError {
    /// HTTP status code, for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Unknown(format!("HTTP error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// A single `data:` payload that failed structural validation.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid chunk: {0}")]
    Invalid(String),
}

/// Rejected before any request is issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Query cannot be empty")]
    EmptyQuery,

    #[error("Query exceeds maximum length of {0} characters")]
    QueryTooLong(usize),

    #[error("top_k must be between 1 and {max}, got {value}")]
    TopKOutOfRange { value: u32, max: u32 },

    #[error("Unknown query mode: {0}")]
    UnknownMode(String),
}
