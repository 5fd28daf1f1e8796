use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Reads a source of known size in fixed-size chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes. A source that
/// ends before its declared size is an error.
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
    offset: u64,
    size: u64,
}

impl<R: Read> ChunkReader<R> {
    /// Wraps `source`, which must yield exactly `size` bytes.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(source: R, size: u64, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            source,
            chunk_size,
            offset: 0,
            size,
        }
    }

    /// Reads the next chunk. Returns `None` once `size` bytes were read.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        match self.source.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(TransferError::UnexpectedEof {
                    offset: self.offset,
                    size: self.size,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let chunk = Chunk {
            offset: self.offset,
            data: buf,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl ChunkReader<File> {
    /// Opens `path` for chunked reading; the size comes from file metadata.
    pub fn from_path(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::new(file, size, chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn chunk_reader_reads_all() {
        let data = b"AABBCCDDEE";
        let mut reader = ChunkReader::new(Cursor::new(data), 10, 4);
        assert_eq!(reader.remaining(), 10);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.offset, 0);
        assert_eq!(&c1.data, b"AABB");
        assert_eq!(reader.remaining(), 6);

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.offset, 4);
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c3.offset, 8);
        assert_eq!(&c3.data, b"EE");

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_from_path() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 40_000];
        let path = create_test_file(dir.path(), "burger.bin", &data);

        let mut reader = ChunkReader::from_path(&path, 0).unwrap();
        assert_eq!(reader.size(), 40_000);
        assert_eq!(reader.chunk_size(), DEFAULT_CHUNK_SIZE);

        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![16384, 16384, 7232]);
    }

    #[test]
    fn chunk_reader_empty_source() {
        let mut reader = ChunkReader::new(Cursor::new(Vec::new()), 0, 4);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_short_source_is_error() {
        let mut reader = ChunkReader::new(Cursor::new(b"abc".to_vec()), 10, 4);
        let err = reader.next_chunk().unwrap_err();
        assert!(matches!(
            err,
            TransferError::UnexpectedEof { offset: 0, size: 10 }
        ));
    }

    #[test]
    fn chunk_reader_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ChunkReader::from_path(&dir.path().join("nope"), 0);
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
