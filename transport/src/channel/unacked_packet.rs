use std::time::Instant;

use crate::{
    bundle::ReliableOrder,
    packet::Packet,
    wrapping_number::{SeqNum, SEQ_NULL},
};

/// A reliable packet that has been sent, or queued behind a full window,
/// and not yet acknowledged
pub struct UnackedPacket {
    pub packet: Packet,
    /// The channel's next unsent sequence number when this was last sent
    pub last_sent_at_out_seq: SeqNum,
    pub last_sent_time: Instant,
    /// Resent packets give no usable round trip sample
    pub was_resent: bool,
    /// Payload ranges holding reliable messages, kept for piggybacking
    pub reliable_orders: Vec<ReliableOrder>,
}

impl UnackedPacket {
    pub fn new(packet: Packet, reliable_orders: Vec<ReliableOrder>, now: Instant) -> Self {
        Self {
            packet,
            last_sent_at_out_seq: SEQ_NULL,
            last_sent_time: now,
            was_resent: false,
            reliable_orders,
        }
    }

    pub fn seq(&self) -> SeqNum {
        self.packet.seq()
    }

    pub fn mark_sent(&mut self, out_seq: SeqNum, now: Instant) {
        self.last_sent_at_out_seq = out_seq;
        self.last_sent_time = now;
    }
}

