use std::io;

use thiserror::Error;

/// Why a send, a request or a channel failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Reason {
    /// A packet could not be decoded
    #[error("Corrupted packet")]
    CorruptedPacket,

    /// An unclassified socket error
    #[error("General network error")]
    GeneralNetwork,

    /// The destination port is not listening (connection refused)
    #[error("No such port")]
    NoSuchPort,

    /// The socket would block
    #[error("Resource temporarily unavailable")]
    ResourceUnavailable,

    /// The kernel's transmit queue is full
    #[error("Transmit queue full")]
    TransmitQueueFull,

    /// The peer has failed or the channel was torn down
    #[error("Channel lost")]
    ChannelLost,

    /// No reply arrived before the request timed out
    #[error("Timer expired")]
    TimerExpired,

    /// Nothing has been received from the peer for too long
    #[error("Channel inactive")]
    Inactivity,

    /// The interface is being shut down
    #[error("Shutting down")]
    ShuttingDown,

    /// The channel handle does not refer to a live channel
    #[error("No such channel")]
    NoChannel,
}

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const ENOBUFS: i32 = 105;
    } else if #[cfg(unix)] {
        const ENOBUFS: i32 = 55;
    } else if #[cfg(windows)] {
        const ENOBUFS: i32 = 10055;
    } else {
        const ENOBUFS: i32 = -1;
    }
}

impl Reason {
    /// Whether a send that failed for this reason is worth retrying
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Reason::NoSuchPort | Reason::ResourceUnavailable | Reason::TransmitQueueFull
        )
    }
}

impl From<&io::Error> for Reason {
    fn from(error: &io::Error) -> Self {
        if error.raw_os_error() == Some(ENOBUFS) {
            return Reason::TransmitQueueFull;
        }
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Reason::NoSuchPort,
            io::ErrorKind::WouldBlock => Reason::ResourceUnavailable,
            _ => Reason::GeneralNetwork,
        }
    }
}
