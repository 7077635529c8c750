use std::collections::HashMap;

use crate::types::ChannelKey;

mod channel;
mod error;
mod fragments;
mod seq_ring;
mod udp_channel;
mod unacked_packet;

pub use channel::{ChannelBase, ChannelCounters};
pub use error::{ChannelError, ReceiverError};
pub use fragments::{FragmentAssembler, MAX_FRAGMENTS};
pub use seq_ring::SeqRing;
pub use udp_channel::{ReceiveWindowResult, UdpChannel};
pub use unacked_packet::UnackedPacket;

/// Every live channel of an interface, owned by key
pub type ChannelStore = HashMap<ChannelKey, UdpChannel>;
