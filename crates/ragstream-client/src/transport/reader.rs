use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::buffer_utils::Utf8Decoder;
use crate::error::Result;
use crate::traits::{ByteStream, ChatTransport};
use crate::types::QueryRequest;

enum Read {
    Cancelled,
    Next(Option<Result<Bytes>>),
}

/// Pulls text increments off a response body.
///
/// Owns the body for as long as it is being read; the connection is dropped
/// as soon as the stream ends, fails or is cancelled.
pub struct TransportReader {
    stream: Option<ByteStream>,
    decoder: Utf8Decoder,
    cancel: CancellationToken,
    cancelled: bool,
    bytes_read: usize,
}

impl TransportReader {
    pub fn new(stream: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            stream: Some(stream),
            decoder: Utf8Decoder::new(),
            cancel,
            cancelled: false,
            bytes_read: 0,
        }
    }

    /// Issue the request. Cancellation while connecting yields a reader
    /// that is already finished rather than an error.
    pub async fn open(
        transport: &dyn ChatTransport,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<Self> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Stream cancelled before the response arrived");
                Ok(Self {
                    stream: None,
                    decoder: Utf8Decoder::new(),
                    cancel: cancel.clone(),
                    cancelled: true,
                    bytes_read: 0,
                })
            }
            opened = transport.open_stream(request) => {
                opened.map(|stream| Self::new(stream, cancel.clone()))
            }
        }
    }

    /// Next decoded text increment.
    ///
    /// `Ok(None)` means the stream is over: either the body ended or the
    /// token was cancelled (see [`was_cancelled`](Self::was_cancelled)).
    pub async fn next_text(&mut self) -> Result<Option<String>> {
        loop {
            if self.cancel.is_cancelled() {
                self.mark_cancelled();
                return Ok(None);
            }

            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Read::Cancelled,
                next = stream.next() => Read::Next(next),
            };

            match read {
                Read::Cancelled => {
                    self.mark_cancelled();
                    return Ok(None);
                }
                Read::Next(None) => {
                    self.release("end of stream");
                    return Ok(self.decoder.finish());
                }
                Read::Next(Some(Err(e))) => {
                    self.release("read error");
                    return Err(e);
                }
                Read::Next(Some(Ok(bytes))) => {
                    self.bytes_read += bytes.len();
                    let text = self.decoder.decode(&bytes);
                    // A read holding only part of a character produces nothing yet
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
            }
        }
    }

    /// Drop the response body, closing the connection.
    pub fn release(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            tracing::debug!(reason, bytes_read = self.bytes_read, "Released response stream");
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    fn mark_cancelled(&mut self) {
        self.cancelled = true;
        self.release("cancelled");
    }
}
