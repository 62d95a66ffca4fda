use pktwire_transport::TransportError;

/// Errors that can occur while building, encoding, or reassembling packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet would exceed the configured maximum encoded size.
    #[error("packet too large ({size} bytes encoded, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The configuration cannot describe a valid wire format.
    #[error("invalid packet config: {0}")]
    InvalidConfig(String),

    /// The buffer was constructed with a capacity below the packet ceiling.
    #[error("packet buffer is unusable (capacity below maximum packet size)")]
    BufferUnusable,

    /// A declared length can never be satisfied; the stream is out of sync.
    #[error("framing desynchronized: declared length {declared}, capacity {capacity}")]
    Desynchronized { declared: usize, capacity: usize },

    /// The buffer is poisoned by an earlier desynchronization.
    #[error("packet buffer poisoned; reset required")]
    Poisoned,

    /// More bytes were ingested than the arena has room for.
    #[error("ingest overrun ({filled} held + {incoming} new > capacity {capacity})")]
    Overrun {
        filled: usize,
        incoming: usize,
        capacity: usize,
    },

    /// A transport operation failed.
    #[error("frame transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when a receive or send found nothing to do on a non-blocking
    /// endpoint, or ran into the endpoint's timeout.
    pub fn is_would_block(&self) -> bool {
        match self {
            Self::Transport(TransportError::Receive(err) | TransportError::Send(err)) => matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
