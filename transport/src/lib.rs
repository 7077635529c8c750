//! # Wicket Transport
//! Reliable, ordered channels multiplexed over a single UDP socket, with
//! selective and cumulative acks, piggybacked resends, keep-alive checks and
//! graceful channel teardown.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod bundle;
mod channel;
mod config;
mod constants;
mod interface;
mod manager;
mod packet;
mod reason;
mod sender;
mod stats;
mod timer;
mod types;
mod wrapping_number;

pub use bundle::{
    message, Bundle, BundleError, BundlePrimer, MessageKind, RawMessage, ReliableOrder,
};
pub use channel::{
    ChannelBase, ChannelCounters, ChannelError, ChannelStore, FragmentAssembler,
    ReceiveWindowResult, ReceiverError, SeqRing, UdpChannel, UnackedPacket, MAX_FRAGMENTS,
};
pub use config::{
    ChannelConfig, CondemnedConfig, KeepAliveConfig, LinkConditionerConfig, NetworkConfig,
    OnceOffConfig, OverflowConfig, SendRetryConfig,
};
pub use constants::*;
pub use interface::{
    ChannelFinder, FinderResult, IncomingMessage, InterfaceEvent, NetworkContext,
    NetworkInterface, PacketReceiver, ReplyHandler, RequestManager, TimerTarget,
};
pub use manager::{
    ChannelMap, ChannelMapError, CondemnedChannels, DelayedChannels, IrregularChannels,
    KeepAliveChannels, KeepAliveCheck, MonitoredChannels,
};
pub use packet::{Packet, PacketError, PacketFlags};
pub use reason::Reason;
pub use sender::{
    Conditioned, LinkConditioner, OnceOffReceiver, OnceOffSender, PacketFilter, PacketSender,
    PacketSocket, PacketTransmit, Transmitter, UdpPacketSocket,
};
pub use stats::{ReceivingStats, SendingStats};
pub use timer::{TimeQueue, Timer, TimerGuard, TimerQueue};
pub use types::{
    ChannelId, ChannelKey, ChannelState, ChannelTraits, ChannelVersion, KeyGenerator, ReplyId,
    CHANNEL_ID_NULL,
};
pub use wrapping_number::{
    is_valid_seq, seq_add, seq_distance, seq_greater_than, seq_less_than, seq_mask, seq_next,
    try_seq_diff, SeqNum, SeqNumAllocator, WrappingNumberError, SEQ_MASK, SEQ_NULL, SEQ_SIZE,
};
