use futures::Stream;
use std::pin::Pin;

use crate::buffer_utils::{ChunkDecoder, Decoded, FrameBuffer};
use crate::error::{Result, StreamError};
use crate::transport::TransportReader;
use crate::types::Chunk;

/// What the pipeline hands to its consumer.
///
/// At most one terminal event (`Finished` or `Interrupted`) is yielded, and
/// always last. A failure is yielded as `Err` and also ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(Chunk),
    Finished(FinishReason),
    /// The cancellation token fired; partial output was already delivered.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// `data: [DONE]` was received
    Sentinel,
    /// The body ended without a sentinel
    EndOfStream,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Reader → frame buffer → chunk decoder, as a lazy stream of events.
///
/// Nothing is read until the stream is polled. Frames are decoded in arrival
/// order and chunks from one read are all yielded before the next read.
pub fn chunk_stream(mut reader: TransportReader) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut frames = FrameBuffer::with_capacity(4096);
        let mut decoder = ChunkDecoder::new();
        let mut chunks = 0usize;

        loop {
            let text = match reader.next_text().await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    frames.finish();
                    if reader.was_cancelled() {
                        tracing::info!(chunks, "Stream interrupted");
                        yield Ok(StreamEvent::Interrupted);
                    } else {
                        tracing::debug!(chunks, "Stream ended without sentinel");
                        yield Ok(StreamEvent::Finished(FinishReason::EndOfStream));
                    }
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, chunks, "Stream read failed");
                    yield Err(e);
                    return;
                }
            };

            frames.extend(&text);

            while let Some(frame) = frames.next_frame() {
                for decoded in decoder.decode_frame(&frame) {
                    match decoded {
                        Decoded::Chunk(chunk) => {
                            chunks += 1;
                            yield Ok(StreamEvent::Chunk(chunk));
                        }
                        Decoded::Done => {
                            reader.release("sentinel");
                            tracing::debug!(chunks, skipped = decoder.skipped(), "Stream completed");
                            yield Ok(StreamEvent::Finished(FinishReason::Sentinel));
                            return;
                        }
                        Decoded::ServerError(message) => {
                            reader.release("server error");
                            tracing::error!(message = %message, chunks, "Producer reported an error");
                            yield Err(StreamError::Server(message));
                            return;
                        }
                    }
                }
            }
        }
    })
}
