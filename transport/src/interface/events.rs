use std::net::SocketAddr;

use crate::{
    packet::Packet,
    types::{ChannelId, ChannelKey, ReplyId},
};

/// A message delivered by the interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The channel it arrived on, `None` for off-channel traffic
    pub channel: Option<ChannelKey>,
    pub source: SocketAddr,
    /// Set for requests: the id to answer with `Bundle::add_reply`
    pub reply_id: Option<ReplyId>,
    pub data: Vec<u8>,
}

/// Something the application should know about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceEvent {
    Message(IncomingMessage),
    /// A peer's first packet created an anonymous channel
    ChannelCreated { channel: ChannelKey, addr: SocketAddr },
    /// Nothing has been received on the channel for its inactivity period
    ChannelInactive { channel: ChannelKey, addr: SocketAddr },
    /// The channel's peer is considered dead
    ChannelFailed { channel: ChannelKey, addr: SocketAddr },
    ChannelDestroyed { channel: ChannelKey },
}

/// How an indexed channel was resolved
#[derive(Debug, PartialEq, Eq)]
pub enum FinderResult {
    Found(ChannelKey),
    /// The finder dealt with the packet itself
    Handled,
    NotFound,
}

/// Resolves packets addressed to indexed channels
pub trait ChannelFinder {
    fn find(&mut self, id: ChannelId, source: &SocketAddr, packet: &Packet) -> FinderResult;
}
