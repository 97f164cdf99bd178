//! RecordIO framing.
//!
//! Wire format: `<decimal length>\n<length bytes>` repeated. Each record
//! carries exactly one serialized message.

use std::collections::VecDeque;
use std::marker::PhantomData;

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::content::{self, ContentType, WireMessage};
use crate::error::{AgentError, Result};

/// Default upper bound on a single record: 16 MiB.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Longest accepted header (`u64::MAX` has 20 digits).
const MAX_HEADER_DIGITS: usize = 20;

/// Frames one record.
pub fn encode(record: &[u8]) -> Bytes {
    let header = format!("{}\n", record.len());
    let mut framed = BytesMut::with_capacity(header.len() + record.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(record);
    framed.freeze()
}

/// Serializes a message and frames it.
pub fn encode_message<T: WireMessage>(content_type: ContentType, message: &T) -> Result<Bytes> {
    let body = content::serialize(content_type, message)?;
    Ok(encode(&body))
}

/// Incremental RecordIO decoder. Feed it chunks in arrival order.
#[derive(Debug)]
pub struct Decoder {
    buffer: BytesMut,
    max_record_size: usize,
    failed: bool,
}

impl Decoder {
    pub fn new(max_record_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_record_size,
            failed: false,
        }
    }

    /// Appends `chunk` and returns every record it completes.
    ///
    /// After an error the decoder stays failed.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        if self.failed {
            return Err(AgentError::RecordIoError(
                "Decoder is in a failed state".to_string(),
            ));
        }

        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        loop {
            match self.next_record() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return Ok(records),
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }
    }

    /// Checks the stream ended on a record boundary.
    pub fn finish(&self) -> Result<()> {
        if self.failed || self.buffer.is_empty() {
            return Ok(());
        }
        Err(AgentError::RecordIoError(format!(
            "Unexpected EOF with {} buffered bytes",
            self.buffer.len()
        )))
    }

    fn next_record(&mut self) -> Result<Option<Bytes>> {
        let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
            if self.buffer.len() > MAX_HEADER_DIGITS {
                return Err(AgentError::RecordIoError(
                    "Record header exceeds maximum length".to_string(),
                ));
            }
            return Ok(None);
        };

        if newline == 0 || newline > MAX_HEADER_DIGITS {
            return Err(AgentError::RecordIoError(format!(
                "Invalid record header length {}",
                newline
            )));
        }

        let header = std::str::from_utf8(&self.buffer[..newline])
            .ok()
            .filter(|h| h.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                AgentError::RecordIoError("Record header is not a decimal number".to_string())
            })?;

        let length: usize = header
            .parse()
            .map_err(|e| AgentError::RecordIoError(format!("Invalid record length: {}", e)))?;

        if length > self.max_record_size {
            return Err(AgentError::RecordIoError(format!(
                "Record of {} bytes exceeds maximum of {} bytes",
                length, self.max_record_size
            )));
        }

        if self.buffer.len() < newline + 1 + length {
            return Ok(None);
        }

        self.buffer.advance(newline + 1);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_SIZE)
    }
}

/// Reads typed messages out of a RecordIO byte stream.
///
/// The sequence is finite and not restartable: once `read` returns
/// `Ok(None)` or an error, every later call returns `Ok(None)`.
pub struct RecordReader<T> {
    source: Option<BoxStream<'static, Result<Bytes>>>,
    decoder: Decoder,
    pending: VecDeque<Bytes>,
    content_type: ContentType,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireMessage> RecordReader<T> {
    pub fn new<S>(source: S, content_type: ContentType, max_record_size: usize) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            source: Some(source.boxed()),
            decoder: Decoder::new(max_record_size),
            pending: VecDeque::new(),
            content_type,
            _marker: PhantomData,
        }
    }

    /// Next message, `Ok(None)` at a clean end of stream.
    pub async fn read(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return match content::deserialize(self.content_type, &record) {
                    Ok(message) => Ok(Some(message)),
                    Err(e) => {
                        self.close();
                        Err(e)
                    }
                };
            }

            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };

            match source.next().await {
                Some(Ok(chunk)) => match self.decoder.decode(&chunk) {
                    Ok(records) => self.pending.extend(records),
                    Err(e) => {
                        self.close();
                        return Err(e);
                    }
                },
                Some(Err(e)) => {
                    self.close();
                    return Err(e);
                }
                None => {
                    self.source = None;
                    self.decoder.finish()?;
                    return Ok(None);
                }
            }
        }
    }

    /// Drops the underlying byte stream.
    pub fn close(&mut self) {
        self.source = None;
        self.pending.clear();
    }
}
