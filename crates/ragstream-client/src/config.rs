// Client configuration: where the service lives and request defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::QueryMode;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_STREAM_PATH: &str = "/api/v1/chat/stream";
pub const DEFAULT_QUERY_PATH: &str = "/api/v1/chat/query";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub stream_path: String,
    /// Non-streaming fallback endpoint
    pub query_path: String,
    /// Applies to establishing the connection only. Streams have no deadline.
    pub connect_timeout_secs: u64,
    pub default_mode: QueryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            query_path: DEFAULT_QUERY_PATH.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            default_mode: QueryMode::default(),
            top_k: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn with_query_path(mut self, path: impl Into<String>) -> Self {
        self.query_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_default_mode(mut self, mode: QueryMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    pub fn query_url(&self) -> String {
        join_url(&self.base_url, &self.query_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
