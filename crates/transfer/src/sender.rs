//! Outgoing half of a transfer.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use p2pburger_protocol::{ControlMessage, FileMetadata};

use crate::channel::DataChannel;
use crate::chunked::ChunkReader;
use crate::progress::TransferProgress;
use crate::{MAX_BUFFERED_AMOUNT, TransferError};

/// Result of one [`FileSender::pump`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The channel buffer is full; call `pump` again once it drains.
    Paused(TransferProgress),
    /// Every byte has been handed to the channel.
    Complete(TransferProgress),
}

impl PumpOutcome {
    pub fn progress(&self) -> TransferProgress {
        match self {
            Self::Paused(p) | Self::Complete(p) => *p,
        }
    }
}

/// Streams one file over a [`DataChannel`].
///
/// [`start`](Self::start) sends the metadata frame; each
/// [`pump`](Self::pump) then writes chunks until the channel's buffer
/// reaches [`MAX_BUFFERED_AMOUNT`] or the file is exhausted. The next chunk
/// is read only after the previous one was handed to the channel.
pub struct FileSender<R> {
    metadata: FileMetadata,
    reader: ChunkReader<R>,
    started: bool,
    sent: u64,
}

impl<R: Read> FileSender<R> {
    pub fn new(metadata: FileMetadata, reader: ChunkReader<R>) -> Self {
        Self {
            metadata,
            reader,
            started: false,
            sent: 0,
        }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress::new(self.sent, self.metadata.size)
    }

    pub fn is_complete(&self) -> bool {
        self.started && self.sent == self.metadata.size
    }

    /// Sends the metadata frame. Must be called once, before `pump`.
    pub fn start<C: DataChannel>(&mut self, channel: &mut C) -> Result<(), TransferError> {
        if self.started {
            return Ok(());
        }
        let json = ControlMessage::Metadata(self.metadata.clone()).to_json()?;
        channel.send_text(&json)?;
        self.started = true;
        tracing::debug!(name = %self.metadata.name, size = self.metadata.size, "metadata sent");
        Ok(())
    }

    /// Writes chunks while the channel has room.
    pub fn pump<C: DataChannel>(&mut self, channel: &mut C) -> Result<PumpOutcome, TransferError> {
        if !self.started {
            self.start(channel)?;
        }

        while self.sent < self.metadata.size {
            if channel.buffered_amount() >= MAX_BUFFERED_AMOUNT {
                return Ok(PumpOutcome::Paused(self.progress()));
            }
            let Some(chunk) = self.reader.next_chunk()? else {
                return Err(TransferError::UnexpectedEof {
                    offset: self.sent,
                    size: self.metadata.size,
                });
            };
            channel.send_binary(&chunk.data)?;
            self.sent = chunk.end();
        }

        tracing::debug!(name = %self.metadata.name, bytes = self.sent, "all chunks handed to channel");
        Ok(PumpOutcome::Complete(self.progress()))
    }
}

impl FileSender<File> {
    /// Prepares to send the file at `path` under its own file name.
    pub fn from_path(path: &Path, mime_type: impl Into<String>) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;
        let reader = ChunkReader::from_path(path, 0)?;
        let metadata = FileMetadata {
            name,
            size: reader.size(),
            mime_type: mime_type.into(),
        };
        Ok(Self::new(metadata, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Records frames; `buffered` grows with every binary frame until drained.
    #[derive(Default)]
    struct RecordingChannel {
        texts: Vec<String>,
        chunks: Vec<Vec<u8>>,
        buffered: usize,
    }

    impl DataChannel for RecordingChannel {
        fn send_text(&mut self, text: &str) -> Result<(), TransferError> {
            self.texts.push(text.to_owned());
            Ok(())
        }

        fn send_binary(&mut self, data: &[u8]) -> Result<(), TransferError> {
            self.buffered += data.len();
            self.chunks.push(data.to_vec());
            Ok(())
        }

        fn buffered_amount(&self) -> usize {
            self.buffered
        }
    }

    fn sender_for(data: Vec<u8>) -> FileSender<Cursor<Vec<u8>>> {
        let size = data.len() as u64;
        let meta = FileMetadata {
            name: "burger.bin".into(),
            size,
            mime_type: "application/octet-stream".into(),
        };
        FileSender::new(meta, ChunkReader::new(Cursor::new(data), size, 0))
    }

    #[test]
    fn metadata_precedes_chunks() {
        let mut channel = RecordingChannel::default();
        let mut sender = sender_for(vec![1u8; 40_000]);
        let outcome = sender.pump(&mut channel).unwrap();

        assert!(matches!(outcome, PumpOutcome::Complete(p) if p.bytes == 40_000));
        assert_eq!(channel.texts.len(), 1);
        assert!(channel.texts[0].starts_with(r#"{"type":"metadata""#));
        let sizes: Vec<usize> = channel.chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![16384, 16384, 7232]);
        assert!(sender.is_complete());
    }

    #[test]
    fn pauses_at_buffer_bound_and_resumes() {
        let mut channel = RecordingChannel::default();
        let total = MAX_BUFFERED_AMOUNT * 2 + 100;
        let mut sender = sender_for(vec![9u8; total]);

        let first = sender.pump(&mut channel).unwrap();
        assert!(matches!(first, PumpOutcome::Paused(_)));
        assert_eq!(channel.buffered, MAX_BUFFERED_AMOUNT);

        // The transport drains its queue.
        channel.buffered = 0;
        let second = sender.pump(&mut channel).unwrap();
        assert!(matches!(second, PumpOutcome::Paused(_)));

        channel.buffered = 0;
        let third = sender.pump(&mut channel).unwrap();
        assert_eq!(third, PumpOutcome::Complete(TransferProgress::new(total as u64, total as u64)));

        let sent: usize = channel.chunks.iter().map(Vec::len).sum();
        assert_eq!(sent, total);
        assert_eq!(channel.texts.len(), 1);
    }

    #[test]
    fn zero_byte_file_sends_metadata_only() {
        let mut channel = RecordingChannel::default();
        let mut sender = sender_for(Vec::new());
        let outcome = sender.pump(&mut channel).unwrap();

        assert_eq!(outcome, PumpOutcome::Complete(TransferProgress::new(0, 0)));
        assert_eq!(channel.texts.len(), 1);
        assert!(channel.chunks.is_empty());
    }

    #[test]
    fn short_source_fails() {
        let mut channel = RecordingChannel::default();
        let meta = FileMetadata {
            name: "liar.bin".into(),
            size: 100,
            mime_type: String::new(),
        };
        let mut sender = FileSender::new(meta, ChunkReader::new(Cursor::new(vec![0u8; 10]), 100, 0));
        let err = sender.pump(&mut channel).unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedEof { .. }));
    }

    #[test]
    fn from_path_uses_file_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fries.txt");
        std::fs::write(&path, b"crispy").unwrap();

        let sender = FileSender::from_path(&path, "text/plain").unwrap();
        assert_eq!(sender.metadata().name, "fries.txt");
        assert_eq!(sender.metadata().size, 6);
        assert_eq!(sender.metadata().mime_type, "text/plain");
    }
}
