//! In-process byte pipe with explicit half-close.
//!
//! The writer either closes (clean EOF for the reader) or fails (the reader
//! sees the error). Dropping the writer without either is treated as EOF.
//! At most one chunk is in flight, so a slow reader applies backpressure to
//! the writer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::AgentError;

/// Why a pipe end stopped working.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The reader went away.
    #[error("Pipe reader closed")]
    ReaderClosed,

    /// The writer failed the pipe with a reason.
    #[error("{0}")]
    Failed(String),
}

impl From<PipeError> for AgentError {
    fn from(err: PipeError) -> Self {
        AgentError::PipeError(err.to_string())
    }
}

/// Creates a connected reader/writer pair.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = mpsc::channel(1);
    (PipeReader { rx: Some(rx) }, PipeWriter { tx })
}

/// Writing end.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Result<Bytes, PipeError>>,
}

impl PipeWriter {
    /// Writes one chunk, waiting while the previous one is unread.
    ///
    /// Empty chunks are skipped since readers treat them as nothing.
    pub async fn write(&self, data: Bytes) -> Result<(), PipeError> {
        if data.is_empty() {
            return if self.tx.is_closed() {
                Err(PipeError::ReaderClosed)
            } else {
                Ok(())
            };
        }
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| PipeError::ReaderClosed)
    }

    /// Signals a clean end of stream.
    pub fn close(self) {
        drop(self);
    }

    /// Ends the stream with an error visible to the reader.
    pub async fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(PipeError::Failed(reason.into()))).await;
    }

    /// Resolves once the reader has been closed or dropped.
    pub async fn reader_closed(&self) {
        self.tx.closed().await
    }
}

/// Reading end.
#[derive(Debug)]
pub struct PipeReader {
    rx: Option<mpsc::Receiver<Result<Bytes, PipeError>>>,
}

impl PipeReader {
    /// Next chunk, `Ok(None)` at EOF.
    pub async fn read(&mut self) -> Result<Option<Bytes>, PipeError> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => {
                self.rx = None;
                Err(e)
            }
            None => {
                self.rx = None;
                Ok(None)
            }
        }
    }

    /// Reads until EOF and concatenates the chunks.
    pub async fn read_all(&mut self) -> Result<Bytes, PipeError> {
        let mut all = bytes::BytesMut::new();
        while let Some(chunk) = self.read().await? {
            all.extend_from_slice(&chunk);
        }
        Ok(all.freeze())
    }

    /// Closes the reading end; the writer observes `reader_closed`.
    pub fn close(&mut self) {
        self.rx = None;
    }
}

impl Stream for PipeReader {
    type Item = Result<Bytes, PipeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(data))),
            Poll::Ready(Some(Err(e))) => {
                self.rx = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.rx = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
