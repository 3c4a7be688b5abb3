use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

pub const MAX_QUERY_CHARS: usize = 2000;
pub const MAX_TOP_K: u32 = 20;

/// Retrieval strategy used by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Vector search only
    Naive,
    /// Local graph neighbourhood
    Local,
    /// Global graph summaries
    Global,
    #[default]
    Hybrid,
}

impl QueryMode {
    pub const ALL: [QueryMode; 4] = [
        QueryMode::Naive,
        QueryMode::Local,
        QueryMode::Global,
        QueryMode::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Naive => "naive",
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        QueryMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| RequestError::UnknownMode(s.to_string()))
    }
}

/// Body shared by the streaming and the non-streaming endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub mode: QueryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            query: query.into(),
            mode,
            top_k: None,
        }
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.query.trim().is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        if self.query.chars().count() > MAX_QUERY_CHARS {
            return Err(RequestError::QueryTooLong(MAX_QUERY_CHARS));
        }
        if let Some(value) = self.top_k {
            if value == 0 || value > MAX_TOP_K {
                return Err(RequestError::TopKOutOfRange {
                    value,
                    max: MAX_TOP_K,
                });
            }
        }
        Ok(())
    }
}

/// Response of the synchronous query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub mode: String,
}
