//! Chunked file transfer over a direct data channel.
//!
//! A transfer is one text frame carrying [`FileMetadata`] followed by the
//! file bytes as binary frames of at most [`DEFAULT_CHUNK_SIZE`] bytes, in
//! order. Completion is implicit: the receiver is done when the byte count
//! equals the declared size. The channel must preserve frame order.
//!
//! [`FileMetadata`]: p2pburger_protocol::FileMetadata

mod channel;
mod chunked;
mod progress;
mod receiver;
mod sender;
mod types;
mod validation;

pub use channel::DataChannel;
pub use chunked::ChunkReader;
pub use progress::{SpeedCalculator, TransferProgress};
pub use receiver::{FileReceiver, ReceiverEvent};
pub use sender::{FileSender, PumpOutcome};
pub use types::{Chunk, ReceivedFile};
pub use validation::{sanitize_file_name, save_received_file};

/// Chunk size: 16 KiB, the largest message size every data channel
/// implementation delivers without fragmentation.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// The sender stops writing while the channel has this many bytes queued.
pub const MAX_BUFFERED_AMOUNT: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary chunk received before file metadata")]
    ChunkBeforeMetadata,

    #[error("received {received} bytes but only {declared} were declared")]
    SizeOverflow { declared: u64, received: u64 },

    #[error("metadata received while a transfer is in progress")]
    UnexpectedMetadata,

    #[error("invalid control message: {0}")]
    InvalidControl(String),

    #[error("transfer session is closed")]
    SessionClosed,

    #[error("source ended at byte {offset} of {size}")]
    UnexpectedEof { offset: u64, size: u64 },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("data channel closed")]
    ChannelClosed,
}
