use serde::{Deserialize, Serialize};

use super::Citation;
use crate::error::DecodeError;

/// One decoded delta of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub is_final: bool,
}

impl Chunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            is_final: false,
        }
    }

    /// Parse a single `data:` payload.
    ///
    /// Only a structurally broken payload is an error. Citations that fail
    /// validation are dropped and the text is kept.
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        let mut chunk: Chunk = serde_json::from_str(payload)?;
        chunk.drop_invalid_citations();
        Ok(chunk)
    }

    /// Remove citations that fail validation. Returns how many were removed.
    pub fn drop_invalid_citations(&mut self) -> usize {
        let before = self.citations.len();
        self.citations.retain(|citation| match citation.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid citation");
                false
            }
        });
        before - self.citations.len()
    }
}
