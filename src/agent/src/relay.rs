//! Record relays between streams and pipes.
//!
//! [`transform`] moves decoded records from a RecordIO source into a pipe,
//! re-encoding each one. [`connect`] copies raw chunks from one pipe into
//! another. Both forward strictly in order with at most one chunk in flight.

use bytes::Bytes;
use thiserror::Error;

use a3s_agent_core::content::WireMessage;
use a3s_agent_core::error::Result;
use a3s_agent_core::pipe::{PipeReader, PipeWriter};
use a3s_agent_core::recordio::RecordReader;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The destination's reader went away.
    #[error("Write failed to the pipe")]
    WriteFailed,

    #[error("Failed to read from the pipe: {0}")]
    ReadFailed(String),

    /// A record could not be decoded or re-encoded.
    #[error("{0}")]
    Decode(String),
}

/// Reads records from `source` until EOF, writing `encode(record)` for each.
///
/// On EOF the destination is closed cleanly. On any error the destination is
/// failed with the error text so its reader sees it. The source is closed
/// either way.
pub async fn transform<T, F>(
    mut source: RecordReader<T>,
    destination: PipeWriter,
    mut encode: F,
) -> std::result::Result<(), RelayError>
where
    T: WireMessage,
    F: FnMut(T) -> Result<Bytes>,
{
    loop {
        let frame = match source.read().await {
            Ok(Some(record)) => encode(record),
            Ok(None) => {
                source.close();
                destination.close();
                return Ok(());
            }
            Err(e) => Err(e),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                source.close();
                destination.fail(e.to_string()).await;
                return Err(RelayError::Decode(e.to_string()));
            }
        };

        if destination.write(frame).await.is_err() {
            source.close();
            return Err(RelayError::WriteFailed);
        }
    }
}

/// Copies every chunk of `reader` into `writer` until EOF.
///
/// The writer is borrowed so the caller can keep watching its reader while
/// the copy runs, and decide how to finish it afterwards.
pub async fn connect(
    mut reader: PipeReader,
    writer: &PipeWriter,
) -> std::result::Result<(), RelayError> {
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => {
                if writer.write(chunk).await.is_err() {
                    reader.close();
                    return Err(RelayError::WriteFailed);
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => return Err(RelayError::ReadFailed(e.to_string())),
        }
    }
}
