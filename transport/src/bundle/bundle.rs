use std::time::{Duration, Instant};

use crate::{
    channel::UdpChannel,
    constants::{PACKET_FOOTER_RESERVE, PACKET_HEADER_SIZE, PACKET_MAX_SIZE},
    interface::ReplyHandler,
    packet::{Packet, PacketFlags},
    sender::PacketTransmit,
    types::ReplyId,
    wrapping_number::{seq_add, SeqNum, SeqNumAllocator},
};

use super::{
    message::{frame_message, header_size, MessageKind, REPLY_ID_OFFSET},
    BundleError,
};

/// Byte range of a packet's payload holding reliable messages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReliableOrder {
    pub begin: usize,
    pub end: usize,
}

/// A request written into a bundle, waiting for a reply id once the bundle
/// is sent
pub(crate) struct PendingRequest {
    pub packet_index: usize,
    pub offset: usize,
    pub handler: Box<dyn ReplyHandler>,
    pub timeout: Option<Duration>,
}

/// Application messages waiting to be sent together, sliced into packets
pub struct Bundle {
    packets: Vec<Packet>,
    reliable_orders: Vec<Vec<ReliableOrder>>,
    requests: Vec<PendingRequest>,
    num_messages: usize,
    is_reliable: bool,
    is_critical: bool,
    is_finalised: bool,
    footer_reserve: usize,
}

impl Bundle {
    pub fn new() -> Self {
        Self::with_footer_reserve(0)
    }

    /// Creates a bundle whose packets keep `footer_reserve` extra bytes free,
    /// e.g. for a channel filter
    pub fn with_footer_reserve(footer_reserve: usize) -> Self {
        let mut bundle = Self {
            packets: Vec::new(),
            reliable_orders: Vec::new(),
            requests: Vec::new(),
            num_messages: 0,
            is_reliable: false,
            is_critical: false,
            is_finalised: false,
            footer_reserve,
        };
        bundle.start_packet();
        bundle
    }

    /// Payload bytes available in each packet
    pub fn packet_capacity(&self) -> usize {
        PACKET_MAX_SIZE - PACKET_HEADER_SIZE - PACKET_FOOTER_RESERVE - self.footer_reserve
    }

    fn start_packet(&mut self) {
        let mut packet = Packet::new();
        packet.set_footer_reserve(self.footer_reserve);
        self.packets.push(packet);
        self.reliable_orders.push(Vec::new());
    }

    /// Adds a plain message
    pub fn add_message(&mut self, data: &[u8], reliable: bool) -> Result<(), BundleError> {
        self.write_message(MessageKind::Plain, 0, data, reliable)?;
        Ok(())
    }

    /// Adds a reliable request. `handler` receives the reply, or the reason
    /// no reply will arrive.
    pub fn start_request(
        &mut self,
        data: &[u8],
        handler: Box<dyn ReplyHandler>,
        timeout: Option<Duration>,
    ) -> Result<(), BundleError> {
        let (packet_index, offset) = self.write_message(MessageKind::Request, 0, data, true)?;
        self.requests.push(PendingRequest {
            packet_index,
            offset: offset + REPLY_ID_OFFSET,
            handler,
            timeout,
        });
        Ok(())
    }

    /// Adds a reply to a request received from the peer
    pub fn add_reply(
        &mut self,
        reply_id: ReplyId,
        data: &[u8],
        reliable: bool,
    ) -> Result<(), BundleError> {
        self.write_message(MessageKind::Reply, reply_id, data, reliable)?;
        Ok(())
    }

    fn write_message(
        &mut self,
        kind: MessageKind,
        reply_id: ReplyId,
        data: &[u8],
        reliable: bool,
    ) -> Result<(usize, usize), BundleError> {
        if self.is_finalised {
            return Err(BundleError::AlreadyFinalised);
        }

        let capacity = self.packet_capacity();
        let header = header_size(kind);
        let total = header + data.len();
        if !reliable && total > capacity {
            return Err(BundleError::MessageTooLong {
                size: total,
                max: capacity,
            });
        }

        // Headers never straddle packets and unreliable messages sit whole in one packet
        let remaining = capacity - self.current_packet().body_len();
        if header > remaining || (!reliable && total > remaining) {
            self.start_packet();
        }

        let framed = frame_message(kind, reply_id, data);
        let start = (self.packets.len() - 1, self.current_packet().body_len());
        let mut written = 0;
        while written < framed.len() {
            let room = capacity - self.current_packet().body_len();
            if room == 0 {
                self.start_packet();
                continue;
            }
            let count = room.min(framed.len() - written);
            let index = self.packets.len() - 1;
            let packet = &mut self.packets[index];
            let begin = packet.body_len();
            packet
                .body_mut()
                .extend_from_slice(&framed[written..written + count]);
            if reliable {
                Self::add_reliable_order(&mut self.reliable_orders[index], begin, begin + count);
            }
            written += count;
        }

        if reliable {
            self.is_reliable = true;
        }
        self.num_messages += 1;
        Ok(start)
    }

    fn add_reliable_order(orders: &mut Vec<ReliableOrder>, begin: usize, end: usize) {
        if let Some(last) = orders.last_mut() {
            if last.end == begin {
                last.end = end;
                return;
            }
        }
        orders.push(ReliableOrder { begin, end });
    }

    fn current_packet(&self) -> &Packet {
        &self.packets[self.packets.len() - 1]
    }

    /// Forces the bundle to be sent reliably even without reliable messages
    pub fn reliable(&mut self) {
        self.is_reliable = true;
    }

    /// Marks the bundle as carrying control traffic that must be delivered
    /// before the channel is torn down
    pub fn set_critical(&mut self) {
        self.is_critical = true;
    }

    pub fn is_critical(&self) -> bool {
        self.is_critical
    }

    pub fn is_reliable(&self) -> bool {
        self.is_reliable
    }

    pub fn is_finalised(&self) -> bool {
        self.is_finalised
    }

    pub fn num_messages(&self) -> usize {
        self.num_messages
    }

    pub fn num_packets(&self) -> usize {
        self.packets.len()
    }

    pub fn has_piggybacks(&self) -> bool {
        self.packets.iter().any(|packet| !packet.piggybacks().is_empty())
    }

    /// Whether sending this bundle would put nothing useful on the wire
    pub fn is_empty(&self) -> bool {
        self.num_messages == 0 && !self.is_reliable && !self.has_piggybacks()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Total payload bytes written so far
    pub fn size(&self) -> usize {
        self.packets.iter().map(Packet::body_len).sum()
    }

    /// Embeds the reliable payload of an unacked packet in the last packet
    /// of this bundle. Returns false if it does not fit.
    pub fn piggyback(&mut self, seq: SeqNum, orders: &[ReliableOrder], packet: &Packet) -> bool {
        if self.is_finalised {
            return false;
        }

        let mut body = Vec::new();
        for order in orders {
            body.extend_from_slice(&packet.body()[order.begin..order.end]);
        }
        let piggyback = Packet::new_piggyback(seq, body, packet.piggybacks().to_vec());

        let index = self.packets.len() - 1;
        let carrier = &mut self.packets[index];
        if carrier.free_space() < piggyback.piggyback_size() + PACKET_FOOTER_RESERVE {
            return false;
        }
        carrier.add_piggyback(piggyback);

        // Once piggybacked the original is treated as acked, so the carrier must be reliable
        self.is_reliable = true;
        true
    }

    /// Applies bundle-wide flags to every packet. No messages may be added
    /// afterwards.
    pub fn finalise(&mut self) {
        if self.is_finalised {
            return;
        }

        let is_fragmented = self.packets.len() > 1;
        for packet in self.packets.iter_mut() {
            if is_fragmented {
                packet.enable_flags(PacketFlags::IS_FRAGMENT);
            }
            if self.is_reliable {
                packet.enable_flags(PacketFlags::IS_RELIABLE);
            }
        }
        self.is_finalised = true;
    }

    pub(crate) fn take_requests(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Writes the reply id allocated for a request into its message header
    pub(crate) fn set_reply_id(&mut self, packet_index: usize, offset: usize, reply_id: ReplyId) {
        if let Some(packet) = self.packets.get_mut(packet_index) {
            let body = packet.body_mut();
            if offset + 4 <= body.len() {
                body[offset..offset + 4].copy_from_slice(&reply_id.to_be_bytes());
            }
        }
    }

    /// Writes flags, footers and sequence numbers into every packet and
    /// records reliable packets on the channel.
    ///
    /// Returns the index of the first packet that must not be transmitted
    /// yet because the channel's window is full, or the number of packets if
    /// all of them may go out.
    pub(crate) fn prepare_packets(
        &mut self,
        mut channel: Option<&mut UdpChannel>,
        seq_allocator: &mut SeqNumAllocator,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) -> usize {
        let num_packets = self.packets.len();
        let mut first_overflow = num_packets;
        let mut first_seq = None;

        for index in 0..num_packets {
            let packet = &mut self.packets[index];

            if let Some(channel) = channel.as_deref_mut() {
                channel.write_flags(packet);
            }

            let is_external = channel.as_deref().map_or(false, UdpChannel::is_external);
            if is_external || packet.is_reliable() || packet.is_fragment() {
                packet.enable_flags(PacketFlags::HAS_SEQUENCE_NUMBER);
            }

            if let Some(channel) = channel.as_deref_mut() {
                channel.write_footer(packet);
            }

            if packet.has_flags(PacketFlags::HAS_SEQUENCE_NUMBER) {
                let seq = match channel.as_deref_mut() {
                    Some(channel) if packet.is_reliable() => channel.use_next_sequence_id(),
                    _ => seq_allocator.next_seq(),
                };
                packet.set_seq(seq);

                if packet.is_fragment() {
                    let first = *first_seq.get_or_insert(seq);
                    packet.set_fragment_range(first, seq_add(first, num_packets as u32 - 1));
                }
            }

            if let Some(channel) = channel.as_deref_mut() {
                if packet.is_reliable() {
                    let orders = std::mem::take(&mut self.reliable_orders[index]);
                    let should_send = channel.add_resend_timer(
                        packet.seq(),
                        packet.clone(),
                        orders,
                        transmit,
                        now,
                    );
                    if !should_send && first_overflow == num_packets {
                        first_overflow = index;
                    }
                }
            }
        }

        first_overflow
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new()
    }
}
