use std::net::SocketAddr;

use thiserror::Error;

use crate::types::ChannelKey;

/// Errors that can occur while registering channels by address
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelMapError {
    /// Another channel is already registered for the address
    #[error("Address {addr} is already used by channel {existing:?}")]
    AddressInUse {
        addr: SocketAddr,
        existing: ChannelKey,
    },

    /// No channel is registered for the address
    #[error("No channel is registered for {addr}")]
    NotRegistered { addr: SocketAddr },

    /// The address belongs to a different channel than the one being removed
    #[error("Address {addr} belongs to channel {registered:?}, not {requested:?}")]
    Mismatch {
        addr: SocketAddr,
        registered: ChannelKey,
        requested: ChannelKey,
    },
}
