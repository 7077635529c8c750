use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    bundle::{message::read_messages, MessageKind},
    channel::{FragmentAssembler, ReceiveWindowResult, ReceiverError},
    constants::PACKET_MAX_SIZE,
    packet::{Packet, PacketFlags},
    sender::OnceOffReceiver,
    stats::ReceivingStats,
    timer::{TimerGuard, TimerQueue},
    types::ChannelKey,
    wrapping_number::seq_less_than,
};

use super::{FinderResult, IncomingMessage, InterfaceEvent, NetworkInterface, TimerTarget};

struct PartialBundle {
    assembler: FragmentAssembler,
    last_received: Instant,
}

/// Receive-side state of an interface that belongs to no channel
pub struct PacketReceiver {
    pub(crate) stats: ReceivingStats,
    once_off: OnceOffReceiver,
    off_channel_fragments: HashMap<SocketAddr, PartialBundle>,
    eviction_timer: Option<TimerGuard>,
    pub(crate) buffer: Vec<u8>,
}

impl PacketReceiver {
    pub fn new() -> Self {
        Self {
            stats: ReceivingStats::default(),
            once_off: OnceOffReceiver::new(),
            off_channel_fragments: HashMap::new(),
            eviction_timer: None,
            buffer: vec![0; PACKET_MAX_SIZE],
        }
    }

    pub fn stats(&self) -> &ReceivingStats {
        &self.stats
    }

    /// Peers with a once-off duplicate history
    pub fn num_once_off_peers(&self) -> usize {
        self.once_off.len()
    }

    /// Peers with an incomplete off-channel bundle
    pub fn num_partial_bundles(&self) -> usize {
        self.off_channel_fragments.len()
    }

    /// Records a reliable off-channel packet. Returns false for duplicates.
    fn on_once_off_received(
        &mut self,
        src: SocketAddr,
        packet: &Packet,
        timers: &mut TimerQueue<TimerTarget>,
        max_age: Duration,
        now: Instant,
    ) -> bool {
        self.start_eviction(timers, max_age, now);
        self.once_off.on_received(&src, packet.seq(), now)
    }

    /// Feeds an off-channel packet to its sender's assembler. Returns the
    /// packets of a complete bundle.
    fn assemble_off_channel(
        &mut self,
        src: SocketAddr,
        packet: Packet,
        timers: &mut TimerQueue<TimerTarget>,
        max_age: Duration,
        now: Instant,
    ) -> Result<Option<Vec<Packet>>, ReceiverError> {
        if !packet.is_fragment() {
            return Ok(Some(vec![packet]));
        }

        self.start_eviction(timers, max_age, now);
        let partial = self
            .off_channel_fragments
            .entry(src)
            .or_insert_with(|| PartialBundle {
                assembler: FragmentAssembler::new(),
                last_received: now,
            });
        partial.last_received = now;
        let assembled = partial.assembler.add(packet);
        if !matches!(assembled, Ok(None)) {
            self.off_channel_fragments.remove(&src);
        }
        assembled
    }

    fn start_eviction(
        &mut self,
        timers: &mut TimerQueue<TimerTarget>,
        period: Duration,
        now: Instant,
    ) {
        if self.eviction_timer.is_none() {
            let timer = timers.add_timer(now, period, TimerTarget::OffChannelEviction);
            self.eviction_timer = Some(timer);
        }
    }

    /// Drops off-channel state of peers silent for longer than `max_age`.
    /// The timer stops once nothing is left to watch.
    pub(crate) fn evict_stale(&mut self, now: Instant, max_age: Duration) {
        self.once_off.evict_stale(now, max_age);
        self.off_channel_fragments.retain(|src, partial| {
            let is_stale = now.saturating_duration_since(partial.last_received) > max_age;
            if is_stale {
                debug!("Dropping incomplete off-channel bundle from {}", src);
            }
            !is_stale
        });

        if self.once_off.is_empty() && self.off_channel_fragments.is_empty() {
            self.eviction_timer = None;
        }
    }
}

impl Default for PacketReceiver {
    fn default() -> Self {
        Self::new()
    }
}

enum Resolved {
    Channel(ChannelKey),
    OffChannel,
    Drop,
}

impl NetworkInterface {
    /// Processes one datagram read from the socket
    pub fn process_packet(&mut self, src: SocketAddr, data: &[u8], now: Instant) {
        self.receiver.stats.num_packets_received += 1;
        self.receiver.stats.num_bytes_received += data.len() as u64;

        let filter = self
            .ctx
            .channel_map
            .find(&src)
            .and_then(|key| self.channels.get_mut(&key))
            .and_then(|channel| channel.filter_mut());
        let data = match filter {
            Some(filter) => match filter.recv(&src, data.to_vec()) {
                Some(data) => data,
                None => {
                    debug!("Filter swallowed a packet from {}", src);
                    return;
                }
            },
            None => data.to_vec(),
        };

        let packet = match Packet::decode(&data) {
            Ok(packet) => packet,
            Err(error) => {
                self.receiver.stats.num_corrupted_packets += 1;
                warn!("Dropping corrupted packet from {}: {}", src, error);
                return;
            }
        };

        self.process_decoded_packet(src, packet, data.len(), now);
    }

    fn process_decoded_packet(
        &mut self,
        src: SocketAddr,
        mut packet: Packet,
        num_bytes: usize,
        now: Instant,
    ) {
        if packet.should_create_anonymous() && self.ctx.config.is_external {
            self.receiver.stats.num_corrupted_packets += 1;
            warn!("Refusing channel creation from {} on an external interface", src);
            return;
        }
        if packet.is_reliable() && !packet.has_flags(PacketFlags::HAS_SEQUENCE_NUMBER) {
            self.receiver.stats.num_corrupted_packets += 1;
            warn!("Dropping reliable packet without a sequence number from {}", src);
            return;
        }

        // Piggybacks were sent before their carrier
        let piggybacks = packet.take_piggybacks();
        for mut piggyback in piggybacks {
            self.receiver.stats.num_piggybacks_received += 1;
            if packet.has_flags(PacketFlags::INDEXED_CHANNEL) {
                piggyback.set_indexed_channel(packet.channel_id(), packet.channel_version());
            }
            self.process_decoded_packet(src, piggyback, 0, now);
        }

        match self.resolve_channel(src, &packet, now) {
            Resolved::Channel(key) => self.process_on_channel(key, src, packet, num_bytes, now),
            Resolved::OffChannel => self.process_off_channel(src, packet, now),
            Resolved::Drop => {}
        }
    }

    fn resolve_channel(&mut self, src: SocketAddr, packet: &Packet, now: Instant) -> Resolved {
        if !packet.is_on_channel() {
            return Resolved::OffChannel;
        }

        if packet.has_flags(PacketFlags::INDEXED_CHANNEL) {
            let id = packet.channel_id();
            let found = match self.finder.as_mut() {
                Some(finder) => finder.find(id, &src, packet),
                None => FinderResult::NotFound,
            };
            return match found {
                FinderResult::Found(key) => Resolved::Channel(key),
                FinderResult::Handled => Resolved::Drop,
                FinderResult::NotFound => match self.ctx.condemned.find(id) {
                    Some(key) => Resolved::Channel(key),
                    None => {
                        warn!("No indexed channel {} for packet from {}", id, src);
                        Resolved::Drop
                    }
                },
            };
        }

        match self.find_channel(src, packet.should_create_anonymous(), now) {
            Some(key) => Resolved::Channel(key),
            None => {
                debug!("Dropping on-channel packet from {} with no channel", src);
                Resolved::Drop
            }
        }
    }

    fn process_on_channel(
        &mut self,
        key: ChannelKey,
        src: SocketAddr,
        packet: Packet,
        num_bytes: usize,
        now: Instant,
    ) {
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };

        if channel.has_remote_failed() {
            debug!("Dropping packet from {} on failed channel {:?}", src, key);
            return;
        }
        if packet.has_flags(PacketFlags::INDEXED_CHANNEL)
            && seq_less_than(packet.channel_version(), channel.version())
        {
            debug!(
                "Dropping packet for old version {} of channel {} (now {})",
                packet.channel_version(),
                channel.id(),
                channel.version()
            );
            return;
        }
        if channel.wants_first_packet() {
            if !packet.has_flags(PacketFlags::CREATE_CHANNEL) {
                debug!("Channel {:?} waits for its peer's first packet", key);
                return;
            }
            channel.set_wants_first_packet(false);
        }

        channel.base_mut().on_packet_received(num_bytes, now);

        let cumulative_ack = packet
            .has_flags(PacketFlags::HAS_CUMULATIVE_ACK)
            .then(|| packet.cumulative_ack());
        if let Err(error) = channel.validate_acks(cumulative_ack, packet.acks()) {
            self.receiver.stats.num_corrupted_packets += 1;
            warn!("Channel {:?}: {}", key, error);
            return;
        }
        let transmitter = &mut self.ctx.sender.transmitter;
        if let Some(end_seq) = cumulative_ack {
            if let Err(error) = channel.handle_cumulative_ack(end_seq, transmitter, now) {
                warn!("Channel {:?}: validated cumulative ack failed: {}", key, error);
            }
        }
        for ack in packet.acks() {
            if let Err(error) = channel.handle_ack(*ack, transmitter, now) {
                warn!("Channel {:?}: validated ack failed: {}", key, error);
            }
        }
        self.receiver.stats.num_acks_received += packet.acks().len() as u64;

        let chain = if packet.is_reliable() {
            match channel.add_to_receive_window(packet, src) {
                ReceiveWindowResult::NextInWindow(chain) => chain,
                ReceiveWindowResult::BufferedInWindow => Vec::new(),
                ReceiveWindowResult::Duplicate => {
                    self.receiver.stats.num_duplicate_packets += 1;
                    Vec::new()
                }
                ReceiveWindowResult::OutOfWindow => {
                    self.receiver.stats.num_out_of_window_packets += 1;
                    Vec::new()
                }
                ReceiveWindowResult::Corrupt => {
                    self.receiver.stats.num_corrupted_packets += 1;
                    Vec::new()
                }
            }
        } else if channel.is_external()
            && packet.has_flags(PacketFlags::HAS_SEQUENCE_NUMBER)
            && !channel.validate_unreliable_seq(packet.seq())
        {
            trace!("Channel {:?}: dropping stale unreliable packet {}", key, packet.seq());
            Vec::new()
        } else {
            vec![packet]
        };

        for packet in chain {
            let Some(channel) = self.channels.get_mut(&key) else {
                return;
            };
            if channel.is_condemned() {
                break;
            }
            match channel.fragments_mut().add(packet) {
                Ok(Some(packets)) => self.deliver_bundle(Some(key), src, &packets),
                Ok(None) => {}
                Err(error) => warn!("Channel {:?}: {}", key, error),
            }
        }

        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };
        let should_push_acks = channel.has_acks_to_send()
            && ((channel.is_irregular() && channel.is_established()) || channel.should_push_acks());
        if should_push_acks {
            if let Err(reason) = channel.send(&mut self.ctx, now) {
                debug!("Channel {:?}: pushing acks failed: {}", key, reason);
            }
        }

        if channel.is_condemned() && self.ctx.condemned.check(key, channel, now) {
            self.destroy_channel(key);
        }
    }

    fn process_off_channel(&mut self, src: SocketAddr, packet: Packet, now: Instant) {
        for ack in packet.acks() {
            self.ctx.sender.transmitter.handle_once_off_ack(&src, *ack);
        }
        self.receiver.stats.num_acks_received += packet.acks().len() as u64;

        if packet.is_reliable() {
            if self.ctx.config.is_external {
                warn!("Dropping once-off reliable packet from {} on an external interface", src);
                return;
            }
            if let Err(reason) = self.ctx.sender.send_ack(src, packet.seq(), now) {
                debug!("Acking once-off packet from {} failed: {}", src, reason);
            }
            let is_new = self.receiver.on_once_off_received(
                src,
                &packet,
                &mut self.ctx.timers,
                self.ctx.config.once_off.receive_window(),
                now,
            );
            if !is_new {
                self.receiver.stats.num_duplicate_packets += 1;
                return;
            }
        }

        let assembled = self.receiver.assemble_off_channel(
            src,
            packet,
            &mut self.ctx.timers,
            self.ctx.config.once_off.receive_window(),
            now,
        );
        match assembled {
            Ok(Some(packets)) => self.deliver_bundle(None, src, &packets),
            Ok(None) => {}
            Err(error) => warn!("Off-channel bundle from {}: {}", src, error),
        }
    }

    fn deliver_bundle(&mut self, channel: Option<ChannelKey>, src: SocketAddr, packets: &[Packet]) {
        let data: Vec<u8> = packets
            .iter()
            .flat_map(|packet| packet.body().iter().copied())
            .collect();
        let messages = match read_messages(&data) {
            Ok(messages) => messages,
            Err(error) => {
                self.receiver.stats.num_corrupted_packets += 1;
                warn!("Dropping malformed bundle from {}: {}", src, error);
                return;
            }
        };

        for message in messages {
            self.receiver.stats.num_messages_received += 1;
            match (message.kind, message.reply_id) {
                (MessageKind::Reply, Some(reply_id)) => {
                    self.ctx.requests.handle_reply(reply_id, &src, &message.data);
                }
                (kind, reply_id) => {
                    let reply_id = if kind == MessageKind::Request { reply_id } else { None };
                    self.ctx.events.push(InterfaceEvent::Message(IncomingMessage {
                        channel,
                        source: src,
                        reply_id,
                        data: message.data,
                    }));
                }
            }
        }
    }
}
