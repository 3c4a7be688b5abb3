/// Blank line closing every event frame
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Carry-over buffer that reassembles terminator-delimited frames
/// from arbitrarily chunked text.
pub struct FrameBuffer {
    buffer: String,
}

impl FrameBuffer {
    /// Create a new buffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: String::with_capacity(capacity),
        }
    }

    /// Append decoded text to the buffer
    pub fn extend(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Split off the next complete frame, without its terminator.
    /// Returns None while no terminator has been seen.
    pub fn next_frame(&mut self) -> Option<String> {
        let end = self.buffer.find(FRAME_TERMINATOR)?;
        let frame = self.buffer[..end].to_string();
        self.buffer.drain(..end + FRAME_TERMINATOR.len());
        Some(frame)
    }

    /// Discard an unterminated remainder at end of stream.
    /// Returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "Discarding unterminated trailing frame");
        }
        self.buffer.clear();
        dropped
    }
}
