use crate::TransferError;

/// Outgoing side of an ordered, reliable data channel.
///
/// Sends are fire-and-forget: a successful return only means the frame was
/// queued. [`buffered_amount`](Self::buffered_amount) reports how many
/// bytes are queued and not yet on the wire.
pub trait DataChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransferError>;

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransferError>;

    fn buffered_amount(&self) -> usize;
}
