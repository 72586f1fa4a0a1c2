use async_trait::async_trait;
use bytes::Bytes;

/// One completed transport read: the currently buffered input and whether
/// the peer will ever produce more.
#[derive(Debug, Clone, Default)]
pub struct TransportReadResult {
    /// Unconsumed input, in transport order, possibly split across segments
    pub segments: Vec<Bytes>,
    /// True when no more bytes will arrive after these
    pub is_completed: bool,
}

/// The connection's read side, as seen by the body pump.
///
/// The transport buffers inbound bytes and re-offers everything past the
/// consumed cursor on each read. `read` resolves once bytes exist beyond the
/// examined cursor of the previous [`advance_to`](TransportRead::advance_to),
/// or once the input has completed.
///
/// Dropping an unresolved `read` future must be loss-free: the pump probes
/// reads for synchronous completion and races them against its shutdown
/// token, so a read may be abandoned and re-issued at any await point.
#[async_trait]
pub trait TransportRead: Send {
    /// Waits for readable input or input completion.
    async fn read(&mut self) -> std::io::Result<TransportReadResult>;

    /// Releases bytes up to `consumed` and marks bytes up to `examined` as
    /// inspected. Both are absolute positions within the buffer returned by
    /// the previous read.
    fn advance_to(&mut self, consumed: usize, examined: usize);

    /// Signals that the connection is done with its input (and output) side,
    /// used when the body ends prematurely.
    fn on_input_or_output_completed(&mut self);
}
