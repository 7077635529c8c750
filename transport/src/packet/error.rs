use thiserror::Error;

/// Errors that can occur while decoding a packet off the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Packet is too small to hold the flags header
    #[error("Packet of {size} bytes is too small to hold a header")]
    Undersized { size: usize },

    /// Header carries flags this transport does not understand
    #[error("Packet carries unknown flags {flags:#06x}")]
    UnknownFlags { flags: u16 },

    /// A footer field extends past the start of the payload
    #[error("Packet footer '{field}' needs {needed} bytes but only {remaining} remain")]
    TruncatedFooter {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// The ack footer is present but empty
    #[error("Packet has an ack footer with no acks")]
    ZeroAcks,

    /// An embedded piggyback has an impossible length
    #[error("Piggyback length {length} is invalid with {remaining} bytes remaining")]
    InvalidPiggybackLength { length: i32, remaining: usize },
}
