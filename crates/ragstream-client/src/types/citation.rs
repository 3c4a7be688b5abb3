use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Longest `content_preview` the service produces, in characters.
pub const MAX_PREVIEW_CHARS: usize = 200;

/// Reference to a source passage backing part of an answer.
///
/// Two citations are the same source when their `chunk_id`s match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: i64,
    pub filename: String,
    pub chunk_id: String,
    pub score: f64,
    pub content_preview: String,
}

impl Citation {
    pub fn new(
        doc_id: i64,
        filename: impl Into<String>,
        chunk_id: impl Into<String>,
        score: f64,
        content_preview: impl Into<String>,
    ) -> Self {
        Self {
            doc_id,
            filename: filename.into(),
            chunk_id: chunk_id.into(),
            score,
            content_preview: content_preview.into(),
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.chunk_id.trim().is_empty() {
            return Err(DecodeError::Invalid("citation chunk_id is empty".to_string()));
        }
        if !self.score.is_finite() || !(0.0..=1.0).contains(&self.score) {
            return Err(DecodeError::Invalid(format!(
                "citation {} has score {} outside [0, 1]",
                self.chunk_id, self.score
            )));
        }
        let preview_chars = self.content_preview.chars().count();
        if preview_chars > MAX_PREVIEW_CHARS {
            return Err(DecodeError::Invalid(format!(
                "citation {} preview has {} characters, limit is {}",
                self.chunk_id, preview_chars, MAX_PREVIEW_CHARS
            )));
        }
        Ok(())
    }
}
