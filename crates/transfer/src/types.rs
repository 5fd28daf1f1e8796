use p2pburger_protocol::FileMetadata;

/// One slice of a file read by [`ChunkReader`](crate::ChunkReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of `data` within the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset of the first byte after this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// A file reassembled by [`FileReceiver`](crate::FileReceiver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub metadata: FileMetadata,
    pub data: Vec<u8>,
}

impl ReceivedFile {
    /// Name announced by the sender, unsanitized.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn mime_type(&self) -> &str {
        &self.metadata.mime_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_end_offset() {
        let chunk = Chunk {
            offset: 16384,
            data: vec![0; 100],
        };
        assert_eq!(chunk.end(), 16484);
        assert_eq!(chunk.len(), 100);
    }

    #[test]
    fn received_file_accessors() {
        let file = ReceivedFile {
            metadata: FileMetadata {
                name: "a.txt".into(),
                size: 3,
                mime_type: "text/plain".into(),
            },
            data: b"abc".to_vec(),
        };
        assert_eq!(file.name(), "a.txt");
        assert_eq!(file.mime_type(), "text/plain");
        assert_eq!(file.len(), 3);
    }
}
