use ragstream_client::RequestError;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("A session is already active")]
    SessionActive,

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] RequestError),

    #[error("Illegal session transition: {from:?} -> {to:?}")]
    IllegalTransition { from: SessionState, to: SessionState },
}

pub type Result<T> = std::result::Result<T, SessionError>;
