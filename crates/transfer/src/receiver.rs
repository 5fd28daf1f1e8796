//! Incoming half of a transfer.

use p2pburger_protocol::{ControlMessage, FileMetadata};

use crate::TransferError;
use crate::progress::TransferProgress;
use crate::types::ReceivedFile;

/// What a received frame produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Metadata arrived; chunks follow.
    Started(FileMetadata),
    /// A chunk was appended.
    Progress(TransferProgress),
    /// The declared size was reached; the session is finished.
    /// `progress` is the final, 100% update.
    Complete {
        file: ReceivedFile,
        progress: TransferProgress,
    },
}

enum State {
    AwaitingMetadata,
    Receiving {
        metadata: FileMetadata,
        chunks: Vec<Vec<u8>>,
        received: u64,
    },
    Closed,
}

/// Reassembles one file from the frames of a data channel.
///
/// The first frame must be a metadata text frame. Binary frames are
/// appended in arrival order until their total equals the declared size.
/// Any protocol violation closes the session; later frames are rejected
/// with [`TransferError::SessionClosed`].
pub struct FileReceiver {
    state: State,
}

impl FileReceiver {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingMetadata,
        }
    }

    /// Metadata of the file in progress, if any.
    pub fn metadata(&self) -> Option<&FileMetadata> {
        match &self.state {
            State::Receiving { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        match &self.state {
            State::Receiving {
                metadata, received, ..
            } => Some(TransferProgress::new(*received, metadata.size)),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Handles a text frame.
    pub fn on_text(&mut self, text: &str) -> Result<ReceiverEvent, TransferError> {
        let result = self.handle_text(text);
        if result.is_err() {
            self.state = State::Closed;
        }
        result
    }

    /// Handles a binary frame.
    pub fn on_binary(&mut self, data: &[u8]) -> Result<ReceiverEvent, TransferError> {
        let result = self.handle_binary(data);
        if result.is_err() {
            self.state = State::Closed;
        }
        result
    }

    fn handle_text(&mut self, text: &str) -> Result<ReceiverEvent, TransferError> {
        match self.state {
            State::AwaitingMetadata => {}
            State::Receiving { .. } => return Err(TransferError::UnexpectedMetadata),
            State::Closed => return Err(TransferError::SessionClosed),
        }

        let ControlMessage::Metadata(metadata) = ControlMessage::from_json(text)
            .map_err(|e| TransferError::InvalidControl(e.to_string()))?;
        tracing::info!(name = %metadata.name, size = metadata.size, "incoming file");

        if metadata.size == 0 {
            self.state = State::Closed;
            return Ok(ReceiverEvent::Complete {
                file: ReceivedFile {
                    metadata,
                    data: Vec::new(),
                },
                progress: TransferProgress::new(0, 0),
            });
        }

        self.state = State::Receiving {
            metadata: metadata.clone(),
            chunks: Vec::new(),
            received: 0,
        };
        Ok(ReceiverEvent::Started(metadata))
    }

    fn handle_binary(&mut self, data: &[u8]) -> Result<ReceiverEvent, TransferError> {
        let State::Receiving {
            metadata,
            chunks,
            received,
        } = &mut self.state
        else {
            return Err(match self.state {
                State::AwaitingMetadata => TransferError::ChunkBeforeMetadata,
                _ => TransferError::SessionClosed,
            });
        };

        let total = *received + data.len() as u64;
        if total > metadata.size {
            return Err(TransferError::SizeOverflow {
                declared: metadata.size,
                received: total,
            });
        }
        chunks.push(data.to_vec());
        *received = total;

        if total < metadata.size {
            return Ok(ReceiverEvent::Progress(TransferProgress::new(total, metadata.size)));
        }

        let metadata = metadata.clone();
        let chunks = std::mem::take(chunks);
        self.state = State::Closed;
        tracing::info!(name = %metadata.name, size = metadata.size, "file received");
        Ok(ReceiverEvent::Complete {
            progress: TransferProgress::new(total, metadata.size),
            file: ReceivedFile {
                metadata,
                data: chunks.concat(),
            },
        })
    }
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}
