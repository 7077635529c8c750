use std::{
    collections::{HashSet, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use log::{debug, error, info, trace, warn};

use crate::{
    bundle::{Bundle, BundlePrimer, ReliableOrder},
    config::NetworkConfig,
    constants::{
        EXTERNAL_INITIAL_RTT, EXTERNAL_WINDOW_SIZE, INDEXED_WINDOW_SIZE, INTERNAL_INITIAL_RTT,
        INTERNAL_WINDOW_SIZE, MAX_ACKS, MAX_RECEIVE_WINDOW_SIZE,
    },
    interface::NetworkContext,
    packet::{Packet, PacketFlags},
    reason::Reason,
    sender::{PacketFilter, PacketTransmit},
    types::{ChannelId, ChannelKey, ChannelState, ChannelTraits, ChannelVersion, CHANNEL_ID_NULL},
    wrapping_number::{
        is_valid_seq, seq_distance, seq_less_than, seq_mask, seq_next, SeqNum, SEQ_NULL,
    },
};

use super::{
    channel::ChannelBase, fragments::FragmentAssembler, seq_ring::SeqRing,
    unacked_packet::UnackedPacket, ChannelError,
};

const CUMULATIVE_ACK_SIZE: usize = 4;
const ACK_SIZE: usize = 4;
const ACK_COUNT_SIZE: usize = 1;
const SEQ_FOOTER_SIZE: usize = 4;

/// Outcome of placing a reliable packet in the receive window
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveWindowResult {
    /// The packet was the next expected one. Holds it followed by every
    /// buffered packet it released, in sequence order.
    NextInWindow(Vec<Packet>),
    /// Ahead of the next expected packet, buffered until the gap fills
    BufferedInWindow,
    /// Already delivered or already buffered
    Duplicate,
    /// Too far ahead of the next expected packet
    OutOfWindow,
    /// Invalid sequence number or unexpected source address
    Corrupt,
}

/// Sequence numbers received and not yet acknowledged, in arrival order
#[derive(Default)]
struct AckQueue {
    order: VecDeque<SeqNum>,
    pending: HashSet<SeqNum>,
}

impl AckQueue {
    fn push(&mut self, seq: SeqNum) {
        if self.pending.insert(seq) {
            self.order.push_back(seq);
        }
    }

    fn pop(&mut self) -> Option<SeqNum> {
        let seq = self.order.pop_front()?;
        self.pending.remove(&seq);
        Some(seq)
    }

    /// Drops acks already covered by a cumulative ack up to `in_seq_at`
    fn prune_below(&mut self, in_seq_at: SeqNum) {
        let pending = &mut self.pending;
        self.order.retain(|seq| {
            let keep = !seq_less_than(*seq, in_seq_at);
            if !keep {
                pending.remove(seq);
            }
            keep
        });
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}

/// A reliable, ordered channel to one peer, multiplexed over the interface's
/// socket.
///
/// Outgoing reliable packets are numbered from `large_out_seq_at`. Those in
/// `[oldest_unacked_seq, small_out_seq_at)` have been sent and await an ack,
/// those in `[small_out_seq_at, large_out_seq_at)` are queued behind a full
/// window. Incoming reliable packets are delivered in order starting at
/// `in_seq_at`.
pub struct UdpChannel {
    key: ChannelKey,
    base: ChannelBase,
    traits: ChannelTraits,
    id: ChannelId,
    version: ChannelVersion,
    creation_version: ChannelVersion,
    filter: Option<Box<dyn PacketFilter>>,

    // Outgoing
    window_size: u32,
    small_out_seq_at: SeqNum,
    large_out_seq_at: SeqNum,
    oldest_unacked_seq: SeqNum,
    highest_ack: SeqNum,
    unacked_packets: SeqRing<UnackedPacket>,
    last_reliable_send_time: Option<Instant>,
    last_reliable_resend_time: Option<Instant>,
    round_trip_time: Duration,
    min_inactivity_resend_delay: Duration,
    unacked_critical_seq: SeqNum,
    max_overflow_packets: u32,
    assert_on_max_overflow_packets: bool,
    has_seen_overflow_warning: bool,
    send_window_warn_threshold: u32,
    initial_send_window_warn_threshold: u32,

    // Incoming
    in_seq_at: SeqNum,
    unreliable_in_seq_at: SeqNum,
    buffered_receives: SeqRing<Packet>,
    fragments: FragmentAssembler,
    acks_to_send: AckQueue,
    push_unsent_acks_threshold: usize,

    is_local_regular: bool,
    is_remote_regular: bool,
    is_anonymous: bool,
    is_condemned: bool,
    has_remote_failed: bool,
    should_auto_switch_to_src_addr: bool,
    wants_first_packet: bool,
    should_drop_next_send: bool,
}

impl UdpChannel {
    pub fn new(
        key: ChannelKey,
        addr: Option<SocketAddr>,
        traits: ChannelTraits,
        config: &NetworkConfig,
        now: Instant,
    ) -> Self {
        Self::with_id(key, addr, traits, CHANNEL_ID_NULL, config, now)
    }

    /// Creates an indexed channel, one of possibly many sharing `addr`
    pub fn new_indexed(
        key: ChannelKey,
        addr: Option<SocketAddr>,
        traits: ChannelTraits,
        id: ChannelId,
        config: &NetworkConfig,
        now: Instant,
    ) -> Self {
        Self::with_id(key, addr, traits, id, config, now)
    }

    fn with_id(
        key: ChannelKey,
        addr: Option<SocketAddr>,
        traits: ChannelTraits,
        id: ChannelId,
        config: &NetworkConfig,
        now: Instant,
    ) -> Self {
        let is_indexed = id != CHANNEL_ID_NULL;
        let (window_size, max_overflow_packets) = if is_indexed {
            (INDEXED_WINDOW_SIZE, config.overflow.max_indexed)
        } else if traits.is_internal() {
            (INTERNAL_WINDOW_SIZE, config.overflow.max_internal)
        } else {
            (EXTERNAL_WINDOW_SIZE, config.overflow.max_external)
        };
        let round_trip_time = if traits.is_internal() {
            INTERNAL_INITIAL_RTT
        } else {
            EXTERNAL_INITIAL_RTT
        };
        let send_window_warn_threshold =
            ((window_size as f32) * config.channel.send_window_warn_ratio) as u32;

        Self {
            key,
            base: ChannelBase::new(addr, 0, now),
            traits,
            id,
            version: 0,
            creation_version: 0,
            filter: None,

            window_size,
            small_out_seq_at: 0,
            large_out_seq_at: 0,
            oldest_unacked_seq: SEQ_NULL,
            highest_ack: seq_mask(0u32.wrapping_sub(1)),
            unacked_packets: SeqRing::new(window_size),
            last_reliable_send_time: None,
            last_reliable_resend_time: None,
            round_trip_time,
            min_inactivity_resend_delay: config.channel.min_inactivity_resend_delay,
            unacked_critical_seq: SEQ_NULL,
            max_overflow_packets,
            assert_on_max_overflow_packets: config.overflow.assert_on_max_packets,
            has_seen_overflow_warning: false,
            send_window_warn_threshold,
            initial_send_window_warn_threshold: send_window_warn_threshold,

            in_seq_at: 0,
            unreliable_in_seq_at: SEQ_NULL,
            buffered_receives: SeqRing::new(window_size),
            fragments: FragmentAssembler::new(),
            acks_to_send: AckQueue::default(),
            push_unsent_acks_threshold: config.channel.push_unsent_acks_threshold,

            is_local_regular: true,
            is_remote_regular: true,
            is_anonymous: false,
            is_condemned: false,
            has_remote_failed: false,
            should_auto_switch_to_src_addr: false,
            wants_first_packet: false,
            should_drop_next_send: false,
        }
    }

    // Identity & state

    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.base.addr()
    }

    pub fn traits(&self) -> ChannelTraits {
        self.traits
    }

    pub fn is_external(&self) -> bool {
        self.traits.is_external()
    }

    pub fn is_internal(&self) -> bool {
        self.traits.is_internal()
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_indexed(&self) -> bool {
        self.id != CHANNEL_ID_NULL
    }

    pub fn version(&self) -> ChannelVersion {
        self.version
    }

    pub fn creation_version(&self) -> ChannelVersion {
        self.creation_version
    }

    pub fn state(&self) -> ChannelState {
        if self.is_condemned {
            ChannelState::Condemned
        } else if self.is_anonymous {
            ChannelState::Anonymous
        } else {
            ChannelState::Established
        }
    }

    /// Whether the channel has a peer address to talk to
    pub fn is_established(&self) -> bool {
        self.base.addr().is_some()
    }

    pub fn is_anonymous(&self) -> bool {
        self.is_anonymous
    }

    pub fn is_condemned(&self) -> bool {
        self.is_condemned
    }

    pub fn has_remote_failed(&self) -> bool {
        self.has_remote_failed
    }

    pub fn is_local_regular(&self) -> bool {
        self.is_local_regular
    }

    pub fn is_remote_regular(&self) -> bool {
        self.is_remote_regular
    }

    /// Whether either side sends on this channel less often than every tick
    pub fn is_irregular(&self) -> bool {
        !self.is_local_regular || !self.is_remote_regular
    }

    pub fn wants_first_packet(&self) -> bool {
        self.wants_first_packet
    }

    pub(crate) fn set_wants_first_packet(&mut self, wants_first_packet: bool) {
        self.wants_first_packet = wants_first_packet;
    }

    pub fn base(&self) -> &ChannelBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    pub fn bundle(&self) -> &Bundle {
        self.base.bundle()
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        self.base.bundle_mut()
    }

    pub fn set_bundle_primer(&mut self, primer: Option<Box<dyn BundlePrimer>>) {
        self.base.set_bundle_primer(primer);
    }

    pub fn last_received_time(&self) -> Instant {
        self.base.last_received_time()
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn round_trip_time(&self) -> Duration {
        self.round_trip_time
    }

    pub fn small_out_seq_at(&self) -> SeqNum {
        self.small_out_seq_at
    }

    pub fn large_out_seq_at(&self) -> SeqNum {
        self.large_out_seq_at
    }

    pub fn oldest_unacked_seq(&self) -> SeqNum {
        self.oldest_unacked_seq
    }

    pub fn highest_ack(&self) -> SeqNum {
        self.highest_ack
    }

    pub fn in_seq_at(&self) -> SeqNum {
        self.in_seq_at
    }

    pub fn has_unacked_packets(&self) -> bool {
        self.oldest_unacked_seq != SEQ_NULL
    }

    /// Number of reliable packets sent or queued and not yet acknowledged
    pub fn num_unacked_packets(&self) -> usize {
        self.unacked_packets.len()
    }

    /// Number of reliable packets queued behind a full window
    pub fn num_overflow_packets(&self) -> u32 {
        seq_distance(self.small_out_seq_at, self.large_out_seq_at)
    }

    pub fn num_buffered_receives(&self) -> usize {
        self.buffered_receives.len()
    }

    pub fn has_acks_to_send(&self) -> bool {
        !self.acks_to_send.is_empty()
    }

    pub(crate) fn should_push_acks(&self) -> bool {
        self.acks_to_send.len() >= self.push_unsent_acks_threshold
    }

    pub fn last_reliable_send_time(&self) -> Option<Instant> {
        self.last_reliable_send_time
    }

    pub fn last_reliable_send_or_resend_time(&self) -> Option<Instant> {
        match (self.last_reliable_send_time, self.last_reliable_resend_time) {
            (Some(send), Some(resend)) => Some(send.max(resend)),
            (send, resend) => send.or(resend),
        }
    }

    pub fn unacked_critical_seq(&self) -> SeqNum {
        self.unacked_critical_seq
    }

    pub fn counters(&self) -> &super::ChannelCounters {
        self.base.counters()
    }

    // Configuration

    pub fn set_filter(&mut self, filter: Option<Box<dyn PacketFilter>>) {
        let reserve = filter.as_ref().map_or(0, |filter| filter.max_spare_size());
        self.filter = filter;
        self.base.set_footer_reserve(reserve);
    }

    pub(crate) fn filter_mut(&mut self) -> Option<&mut dyn PacketFilter> {
        match self.filter.as_mut() {
            Some(filter) => Some(filter.as_mut()),
            None => None,
        }
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn set_min_inactivity_resend_delay(&mut self, delay: Duration) {
        self.min_inactivity_resend_delay = delay;
    }

    pub fn set_push_unsent_acks_threshold(&mut self, threshold: usize) {
        self.push_unsent_acks_threshold = threshold;
    }

    /// Lets the peer move to a new address, as long as its packets carry a
    /// channel version no older than ours
    pub fn set_should_auto_switch_to_src_addr(&mut self, should_switch: bool) {
        self.should_auto_switch_to_src_addr = should_switch;
    }

    /// Drops the next packet sent on this channel, for testing
    pub fn drop_next_send(&mut self) {
        self.should_drop_next_send = true;
    }

    /// Copies the settings that describe how `other` is used
    pub fn configure_from(&mut self, other: &UdpChannel) {
        self.is_local_regular = other.is_local_regular;
        self.is_remote_regular = other.is_remote_regular;
        self.should_auto_switch_to_src_addr = other.should_auto_switch_to_src_addr;
        self.push_unsent_acks_threshold = other.push_unsent_acks_threshold;
        self.min_inactivity_resend_delay = other.min_inactivity_resend_delay;
    }

    pub fn set_is_local_regular(
        &mut self,
        is_regular: bool,
        ctx: &mut NetworkContext,
        now: Instant,
    ) {
        self.is_local_regular = is_regular;
        self.update_irregular_membership(ctx, now);
    }

    pub fn set_is_remote_regular(
        &mut self,
        is_regular: bool,
        ctx: &mut NetworkContext,
        now: Instant,
    ) {
        self.is_remote_regular = is_regular;
        self.update_irregular_membership(ctx, now);
    }

    fn update_irregular_membership(&self, ctx: &mut NetworkContext, now: Instant) {
        if self.is_irregular() {
            ctx.irregular.add_if_necessary(self, &mut ctx.timers, now);
        } else {
            ctx.irregular.del_if_necessary(self.key);
        }
    }

    /// Anonymous channels are irregular and keep-alive checked
    pub(crate) fn set_is_anonymous(
        &mut self,
        is_anonymous: bool,
        ctx: &mut NetworkContext,
        now: Instant,
    ) {
        self.is_anonymous = is_anonymous;
        if is_anonymous {
            self.is_local_regular = false;
            self.is_remote_regular = false;
            ctx.keep_alive.add_if_necessary(self.key, &mut ctx.timers, now);
            self.update_irregular_membership(ctx, now);
        } else {
            ctx.keep_alive.del_if_necessary(self.key);
        }
    }

    pub fn start_inactivity_detection(
        &mut self,
        period: Duration,
        check_period: Duration,
        ctx: &mut NetworkContext,
        now: Instant,
    ) {
        self.base
            .start_inactivity_detection(self.key, period, check_period, &mut ctx.timers, now);
    }

    // Sending

    /// Draws the next reliable sequence number
    pub fn use_next_sequence_id(&mut self) -> SeqNum {
        let seq = self.large_out_seq_at;
        self.large_out_seq_at = seq_next(seq);

        if self.is_internal() {
            let usage = self.send_window_usage();
            if usage > self.send_window_warn_threshold {
                warn!(
                    "Channel {:?} to {:?}: send window usage is {} of {} packets",
                    self.key,
                    self.addr(),
                    usage,
                    self.window_size
                );
                self.send_window_warn_threshold = usage;
            }
        }

        seq
    }

    /// Number of sequence numbers between the oldest unacked packet and the
    /// next one to be allocated
    pub fn send_window_usage(&self) -> u32 {
        if self.oldest_unacked_seq == SEQ_NULL {
            return 0;
        }
        seq_distance(self.oldest_unacked_seq, self.large_out_seq_at)
    }

    /// Whether there is anything worth sending in the channel's own bundle
    pub fn has_unsent_data(&self) -> bool {
        self.base.bundle_has_unsent_data(self.base.bundle()) || !self.acks_to_send.is_empty()
    }

    /// Sends the channel's own bundle
    pub fn send(&mut self, ctx: &mut NetworkContext, now: Instant) -> Result<(), Reason> {
        let mut bundle = self.base.take_bundle();
        self.do_send(&mut bundle, true, ctx, now)
    }

    /// Sends a bundle built outside of the channel
    pub fn send_bundle(
        &mut self,
        bundle: &mut Bundle,
        ctx: &mut NetworkContext,
        now: Instant,
    ) -> Result<(), Reason> {
        self.do_send(bundle, false, ctx, now)
    }

    fn do_send(
        &mut self,
        bundle: &mut Bundle,
        is_own_bundle: bool,
        ctx: &mut NetworkContext,
        now: Instant,
    ) -> Result<(), Reason> {
        if self.has_remote_failed {
            for request in bundle.take_requests() {
                let mut handler = request.handler;
                handler.handle_exception(Reason::ChannelLost);
            }
            debug!(
                "Channel {:?}: not sending to {:?}, remote has failed",
                self.key,
                self.addr()
            );
            return Err(Reason::ChannelLost);
        }

        let Some(addr) = self.addr() else {
            warn!("Channel {:?}: cannot send without an address", self.key);
            return Err(Reason::NoChannel);
        };

        if !bundle.is_finalised() {
            self.check_resend_timers(bundle, &mut ctx.sender.transmitter, now);
        }

        if is_own_bundle
            && !self.base.bundle_has_unsent_data(bundle)
            && self.acks_to_send.is_empty()
        {
            return Ok(());
        }

        if self.should_drop_next_send {
            ctx.sender.drop_next_send();
            self.should_drop_next_send = false;
        }

        let is_critical = bundle.is_critical() && bundle.is_reliable();
        let result = ctx.sender.send(
            addr,
            bundle,
            Some(&mut *self),
            &mut ctx.requests,
            &mut ctx.timers,
            now,
        );
        self.base.counters.num_bundles_sent += 1;

        if is_critical {
            self.unacked_critical_seq = seq_mask(self.large_out_seq_at.wrapping_sub(1));
        }

        ctx.irregular.add_if_necessary(self, &mut ctx.timers, now);

        result
    }

    /// Defers a send of the channel's bundle to the end of the tick, so that
    /// several writes in one tick share packets. Regular channels already
    /// send once per tick and ignore this.
    pub fn delayed_send(&mut self, ctx: &mut NetworkContext) {
        if self.is_irregular() {
            ctx.delayed.add(self.key);
        }
    }

    /// Flushes the bundle of an established channel when nothing reliable
    /// has gone out for half the minimum resend delay
    pub fn send_if_idle(&mut self, ctx: &mut NetworkContext, now: Instant) -> Result<(), Reason> {
        if !self.is_established() {
            return Ok(());
        }
        let is_idle = self
            .last_reliable_send_or_resend_time()
            .map_or(true, |last| {
                now.saturating_duration_since(last) > self.min_inactivity_resend_delay / 2
            });
        if !is_idle {
            return Ok(());
        }
        self.send(ctx, now)
    }

    /// Registers a reliable packet as unacknowledged. Returns whether the
    /// caller should transmit it now; otherwise it is queued until the
    /// window has room.
    pub fn add_resend_timer(
        &mut self,
        seq: SeqNum,
        packet: Packet,
        reliable_orders: Vec<ReliableOrder>,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) -> bool {
        if self.oldest_unacked_seq == SEQ_NULL {
            self.oldest_unacked_seq = seq;
        }

        while seq_distance(self.oldest_unacked_seq, seq) + 1 > self.unacked_packets.capacity() {
            self.unacked_packets.double_size(self.oldest_unacked_seq);
        }

        // Only external channels piggyback, so only they need the orders
        let reliable_orders = if self.is_external() {
            reliable_orders
        } else {
            Vec::new()
        };
        let mut unacked = UnackedPacket::new(packet, reliable_orders, now);

        let is_window_full = seq_distance(self.oldest_unacked_seq, seq) >= self.window_size;
        if !is_window_full && self.small_out_seq_at == seq {
            unacked.mark_sent(self.small_out_seq_at, now);
            self.small_out_seq_at = seq_next(seq);
            self.last_reliable_send_time = Some(now);
            self.base.counters.num_reliable_packets_sent += 1;
            self.unacked_packets.insert(seq, unacked);
            return true;
        }

        self.unacked_packets.insert(seq, unacked);
        self.check_overflow_errors();

        // Keep the channel alive if the window has been stuck for too long
        let previous = seq_mask(self.small_out_seq_at.wrapping_sub(1));
        let is_stalled = self.unacked_packets.get(previous).map_or(true, |previous| {
            now.saturating_duration_since(previous.last_sent_time)
                > self.min_inactivity_resend_delay
        });
        if is_stalled && self.unacked_packets.contains(self.small_out_seq_at) {
            debug!(
                "Channel {:?}: window stalled, forcing out overflow packet {}",
                self.key, self.small_out_seq_at
            );
            self.send_overflow_packet(transmit, now);
        }

        false
    }

    fn check_overflow_errors(&mut self) {
        let num_overflow = self.num_overflow_packets();
        let max = self.max_overflow_packets;

        if num_overflow > max / 2 && !self.has_seen_overflow_warning {
            warn!(
                "Channel {:?} to {:?}: {} packets queued behind a full window (max {})",
                self.key,
                self.addr(),
                num_overflow,
                max
            );
            self.has_seen_overflow_warning = true;
        } else if num_overflow < max / 3 && self.has_seen_overflow_warning {
            info!(
                "Channel {:?}: overflow has dropped to {} packets",
                self.key, num_overflow
            );
            self.has_seen_overflow_warning = false;
        }

        if self.assert_on_max_overflow_packets {
            assert!(
                num_overflow < max,
                "Channel {:?}: {} overflow packets reached the maximum of {}",
                self.key,
                num_overflow,
                max
            );
        }
    }

    /// Sends the first queued overflow packet
    fn send_overflow_packet(&mut self, transmit: &mut dyn PacketTransmit, now: Instant) {
        let seq = self.small_out_seq_at;
        self.send_unacked(seq, transmit, now);
        self.small_out_seq_at = seq_next(seq);
    }

    /// Retransmits an unacked packet on its own
    fn send_unacked(&mut self, seq: SeqNum, transmit: &mut dyn PacketTransmit, now: Instant) {
        let Some(addr) = self.addr() else {
            return;
        };
        let out_seq = self.small_out_seq_at;
        let version = self.version;
        let id = self.id;

        let Some(unacked) = self.unacked_packets.get_mut(seq) else {
            return;
        };
        unacked.packet.update_channel_version(version, id);
        let filter: Option<&mut dyn PacketFilter> = match self.filter.as_mut() {
            Some(filter) => Some(filter.as_mut()),
            None => None,
        };
        if let Err(reason) = transmit.send_packet(&addr, &unacked.packet, filter, true, now) {
            debug!("Channel {:?}: resend of {} failed: {}", self.key, seq, reason);
        }
        unacked.mark_sent(out_seq, now);
        unacked.was_resent = true;

        self.last_reliable_resend_time = Some(now);
        self.base.counters.num_packets_resent += 1;
    }

    /// Resends unacked packets that have timed out or that a newer ack shows
    /// were lost. Called before `bundle` is finalised so resends can ride
    /// along in it.
    pub fn check_resend_timers(
        &mut self,
        bundle: &mut Bundle,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) {
        if self.has_remote_failed || self.oldest_unacked_seq == SEQ_NULL {
            return;
        }

        let is_remote_irregular = !self.is_remote_regular;
        let end_seq = if is_remote_irregular {
            self.small_out_seq_at
        } else {
            self.highest_ack
        };
        let resend_period = (self.round_trip_time * 2).max(self.min_inactivity_resend_delay);
        let max_resends = (self.window_size / 8).max(1);

        let mut num_resends = 0;
        let mut seq = self.oldest_unacked_seq;
        while seq_less_than(seq, end_seq) && num_resends < max_resends {
            let should_resend = match self.unacked_packets.get(seq) {
                Some(unacked) => {
                    let has_newer_ack =
                        seq_less_than(unacked.last_sent_at_out_seq, self.highest_ack);
                    let has_timed_out = is_remote_irregular
                        && now.saturating_duration_since(unacked.last_sent_time) > resend_period;
                    has_newer_ack || has_timed_out
                }
                None => false,
            };

            if should_resend {
                num_resends += 1;
                trace!("Channel {:?}: resending {}", self.key, seq);
                self.resend(seq, bundle, transmit, now);
            }

            // A piggyback may have acked the oldest packet
            if self.oldest_unacked_seq == SEQ_NULL {
                break;
            }
            seq = seq_next(seq);
        }
    }

    /// Resends one packet, piggybacking it on `bundle` where possible
    fn resend(
        &mut self,
        seq: SeqNum,
        bundle: &mut Bundle,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) {
        let can_piggyback =
            self.is_external() && !self.unacked_packets.contains(self.small_out_seq_at);

        if can_piggyback {
            let is_piggybacked = match self.unacked_packets.get(seq) {
                Some(unacked) if !unacked.packet.is_fragment() => {
                    bundle.piggyback(seq, &unacked.reliable_orders, &unacked.packet)
                }
                _ => false,
            };
            if is_piggybacked {
                if let Some(unacked) = self.unacked_packets.get_mut(seq) {
                    unacked.was_resent = true;
                }
                self.last_reliable_resend_time = Some(now);
                self.base.counters.num_packets_resent += 1;
                // The carrier is now responsible for delivery
                if let Err(error) = self.handle_ack(seq, transmit, now) {
                    warn!("Channel {:?}: acking piggybacked {} failed: {}", self.key, seq, error);
                }
                return;
            }
        }

        self.send_unacked(seq, transmit, now);
    }

    /// Resends every unacked packet up to and including the last critical
    /// one
    pub fn resend_criticals(&mut self, transmit: &mut dyn PacketTransmit, now: Instant) {
        if self.unacked_critical_seq == SEQ_NULL {
            warn!(
                "Channel {:?}: asked to resend criticals but none are outstanding",
                self.key
            );
            return;
        }
        if self.oldest_unacked_seq == SEQ_NULL {
            return;
        }

        let end_seq = seq_next(self.unacked_critical_seq);
        let mut seq = self.oldest_unacked_seq;
        while seq_less_than(seq, end_seq) && seq_less_than(seq, self.small_out_seq_at) {
            if self.unacked_packets.contains(seq) {
                self.send_unacked(seq, transmit, now);
            }
            seq = seq_next(seq);
        }
    }

    // Acknowledgements

    fn is_in_sent_window(&self, seq: SeqNum) -> bool {
        self.oldest_unacked_seq != SEQ_NULL
            && seq_distance(self.oldest_unacked_seq, seq)
                < seq_distance(self.oldest_unacked_seq, self.small_out_seq_at)
    }

    /// Handles the acknowledgement of a single packet. Acks for packets that
    /// are not outstanding are ignored.
    pub fn handle_ack(
        &mut self,
        seq: SeqNum,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) -> Result<(), ChannelError> {
        if !is_valid_seq(seq) {
            return Err(ChannelError::InvalidSequence { seq });
        }
        if !self.is_in_sent_window(seq) {
            trace!("Channel {:?}: ignoring ack {} outside the window", self.key, seq);
            return Ok(());
        }
        let Some(unacked) = self.unacked_packets.remove(seq) else {
            trace!("Channel {:?}: duplicate ack {}", self.key, seq);
            return Ok(());
        };

        if !unacked.was_resent {
            let sample = now.saturating_duration_since(unacked.last_sent_time);
            self.round_trip_time = (self.round_trip_time * 9 + sample) / 10;
        }
        if seq == self.unacked_critical_seq {
            self.unacked_critical_seq = SEQ_NULL;
        }
        if seq_less_than(self.highest_ack, seq) {
            self.highest_ack = seq;
        }

        if seq == self.oldest_unacked_seq {
            self.oldest_unacked_seq = SEQ_NULL;
            let mut next = seq_next(seq);
            while seq_less_than(next, self.large_out_seq_at) {
                if self.unacked_packets.contains(next) {
                    self.oldest_unacked_seq = next;
                    break;
                }
                next = seq_next(next);
            }
        }

        // Release overflow packets that now fit in the window
        while self.oldest_unacked_seq != SEQ_NULL
            && seq_distance(self.oldest_unacked_seq, self.small_out_seq_at) < self.window_size
            && self.unacked_packets.contains(self.small_out_seq_at)
        {
            self.send_overflow_packet(transmit, now);
        }

        Ok(())
    }

    /// Checks every ack a packet carries without applying any of them
    pub fn validate_acks(
        &self,
        cumulative_ack: Option<SeqNum>,
        acks: &[SeqNum],
    ) -> Result<(), ChannelError> {
        if let Some(end_seq) = cumulative_ack {
            self.check_cumulative_ack(end_seq)?;
        }
        match acks.iter().find(|seq| !is_valid_seq(**seq)) {
            Some(seq) => Err(ChannelError::InvalidSequence { seq: *seq }),
            None => Ok(()),
        }
    }

    fn check_cumulative_ack(&self, end_seq: SeqNum) -> Result<(), ChannelError> {
        if !is_valid_seq(end_seq) {
            return Err(ChannelError::InvalidSequence { seq: end_seq });
        }
        if self.oldest_unacked_seq == SEQ_NULL || !seq_less_than(self.small_out_seq_at, end_seq) {
            return Ok(());
        }

        let error = ChannelError::AckForUnsentPacket {
            end_seq,
            small_out_seq_at: self.small_out_seq_at,
        };
        if self.is_internal() {
            error!("Channel {:?} to {:?}: {}", self.key, self.addr(), error);
        } else {
            debug!("Channel {:?} to {:?}: {}", self.key, self.addr(), error);
        }
        Err(error)
    }

    /// Handles an acknowledgement of every packet before `end_seq`
    pub fn handle_cumulative_ack(
        &mut self,
        end_seq: SeqNum,
        transmit: &mut dyn PacketTransmit,
        now: Instant,
    ) -> Result<(), ChannelError> {
        self.check_cumulative_ack(end_seq)?;
        if self.oldest_unacked_seq == SEQ_NULL {
            return Ok(());
        }

        let mut seq = self.oldest_unacked_seq;
        while seq_less_than(seq, end_seq) {
            self.handle_ack(seq, transmit, now)?;
            seq = seq_next(seq);
        }
        Ok(())
    }

    // Receiving

    /// Places a reliable packet in the receive window
    pub fn add_to_receive_window(
        &mut self,
        packet: Packet,
        src: SocketAddr,
    ) -> ReceiveWindowResult {
        let seq = packet.seq();
        if !is_valid_seq(seq) {
            warn!(
                "Channel {:?}: dropping packet from {} with invalid sequence {:#x}",
                self.key, src, seq
            );
            return ReceiveWindowResult::Corrupt;
        }

        if self.addr() != Some(src) {
            let is_current_version = !seq_less_than(packet.channel_version(), self.version);
            if self.should_auto_switch_to_src_addr && is_current_version {
                info!(
                    "Channel {:?}: switching address from {:?} to {} (version {})",
                    self.key,
                    self.addr(),
                    src,
                    packet.channel_version()
                );
                self.base.set_addr(Some(src));
                self.version = packet.channel_version();
            } else {
                warn!(
                    "Channel {:?}: dropping packet {} from unexpected source {} (expected {:?})",
                    self.key,
                    seq,
                    src,
                    self.addr()
                );
                return ReceiveWindowResult::Corrupt;
            }
        }

        let should_ack = !packet.is_piggyback();

        if seq == self.in_seq_at {
            if should_ack {
                self.acks_to_send.push(seq);
            }
            self.in_seq_at = seq_next(seq);
            let mut chain = vec![packet];
            while let Some(buffered) = self.buffered_receives.remove(self.in_seq_at) {
                chain.push(buffered);
                self.in_seq_at = seq_next(self.in_seq_at);
            }
            return ReceiveWindowResult::NextInWindow(chain);
        }

        if seq_less_than(seq, self.in_seq_at) {
            // The earlier ack may have been lost
            if should_ack {
                self.acks_to_send.push(seq);
            }
            trace!("Channel {:?}: duplicate packet {}", self.key, seq);
            return ReceiveWindowResult::Duplicate;
        }

        let required = seq_distance(self.in_seq_at, seq) + 1;
        if required > self.buffered_receives.capacity() {
            if required > 2 * self.buffered_receives.capacity()
                || required > MAX_RECEIVE_WINDOW_SIZE
            {
                warn!(
                    "Channel {:?}: packet {} is {} ahead of the next expected packet {}",
                    self.key, seq, required, self.in_seq_at
                );
                return ReceiveWindowResult::OutOfWindow;
            }
            self.buffered_receives.double_size(self.in_seq_at);
        }

        if should_ack {
            self.acks_to_send.push(seq);
        }
        if self.buffered_receives.contains(seq) {
            trace!("Channel {:?}: duplicate buffered packet {}", self.key, seq);
            return ReceiveWindowResult::Duplicate;
        }
        self.buffered_receives.insert(seq, packet);
        ReceiveWindowResult::BufferedInWindow
    }

    /// Accepts unreliable packets with increasing sequence numbers only
    pub fn validate_unreliable_seq(&mut self, seq: SeqNum) -> bool {
        if !is_valid_seq(seq) {
            return false;
        }
        if self.unreliable_in_seq_at != SEQ_NULL && seq_less_than(seq, self.unreliable_in_seq_at) {
            debug!(
                "Channel {:?}: dropping stale unreliable packet {} (expected at least {})",
                self.key, seq, self.unreliable_in_seq_at
            );
            return false;
        }
        self.unreliable_in_seq_at = seq_next(seq);
        true
    }

    pub(crate) fn fragments_mut(&mut self) -> &mut FragmentAssembler {
        &mut self.fragments
    }

    // Packet construction

    /// Sets the channel flags on an outgoing packet and fills it with as
    /// many pending acks as fit
    pub fn write_flags(&mut self, packet: &mut Packet) {
        packet.enable_flags(PacketFlags::ON_CHANNEL);

        if self.is_indexed() {
            packet.set_indexed_channel(self.id, self.version);
        }

        // The sequence number footer is written after the acks
        let free_space = |packet: &Packet| packet.free_space().saturating_sub(SEQ_FOOTER_SIZE);

        if free_space(packet) >= CUMULATIVE_ACK_SIZE {
            packet.enable_flags(PacketFlags::HAS_CUMULATIVE_ACK);
            self.acks_to_send.prune_below(self.in_seq_at);
        }

        if !self.acks_to_send.is_empty() && free_space(packet) >= ACK_COUNT_SIZE + ACK_SIZE {
            let num_acks = ((free_space(packet) - ACK_COUNT_SIZE) / ACK_SIZE)
                .min(self.acks_to_send.len())
                .min(MAX_ACKS);
            for _ in 0..num_acks {
                if let Some(ack) = self.acks_to_send.pop() {
                    packet.add_ack(ack);
                }
            }
        }

        if packet.is_reliable()
            && self.is_internal()
            && self.large_out_seq_at == 0
            && self.base.counters.num_reliable_packets_sent == 0
        {
            packet.enable_flags(PacketFlags::CREATE_CHANNEL);
        }
    }

    /// Writes the values of the footers enabled by `write_flags`
    pub fn write_footer(&mut self, packet: &mut Packet) {
        if self.is_indexed() {
            packet.set_indexed_channel(self.id, self.version);
        }
        if packet.has_flags(PacketFlags::HAS_CUMULATIVE_ACK) {
            packet.set_cumulative_ack(self.in_seq_at);
        }
    }

    // Lifecycle

    /// Marks the channel for deletion once everything sent has been
    /// acknowledged. Returns false if it was already condemned.
    pub(crate) fn condemn(&mut self, ctx: &mut NetworkContext, now: Instant) -> bool {
        if self.is_condemned {
            warn!("Channel {:?} to {:?} is already condemned", self.key, self.addr());
            return false;
        }

        if self.has_unsent_data() {
            if self.is_established() {
                if let Err(reason) = self.send(ctx, now) {
                    debug!("Channel {:?}: final send failed: {}", self.key, reason);
                }
            } else {
                warn!(
                    "Channel {:?}: discarding unsent data of unestablished channel",
                    self.key
                );
            }
        }

        self.is_condemned = true;
        self.is_local_regular = false;
        self.is_remote_regular = false;
        ctx.keep_alive.del_if_necessary(self.key);
        ctx.delayed.remove(self.key);
        ctx.requests.cancel_requests_for(self.key, Reason::ChannelLost);
        self.update_irregular_membership(ctx, now);

        info!("Channel {:?} to {:?} condemned", self.key, self.addr());
        true
    }

    /// Stops sending and cancels outstanding requests. Returns false if the
    /// peer was already marked failed.
    pub(crate) fn set_remote_failed(&mut self, ctx: &mut NetworkContext) -> bool {
        if self.has_remote_failed {
            return false;
        }
        self.has_remote_failed = true;
        ctx.requests.cancel_requests_for(self.key, Reason::ChannelLost);
        warn!("Channel {:?}: remote {:?} has failed", self.key, self.addr());
        true
    }

    /// Releases all window, buffer and fragment state, leaving the channel
    /// as if newly created without an address
    pub(crate) fn clear_state(&mut self, warn_on_discard: bool, ctx: &mut NetworkContext) {
        if warn_on_discard {
            if !self.unacked_packets.is_empty() {
                warn!(
                    "Channel {:?} to {:?}: discarding {} unacked packets",
                    self.key,
                    self.addr(),
                    self.unacked_packets.len()
                );
            }
            if !self.buffered_receives.is_empty() {
                warn!(
                    "Channel {:?} to {:?}: discarding {} buffered packets",
                    self.key,
                    self.addr(),
                    self.buffered_receives.len()
                );
            }
            if self.fragments.is_assembling() {
                warn!(
                    "Channel {:?} to {:?}: discarding a partially received bundle",
                    self.key,
                    self.addr()
                );
            }
        }

        self.small_out_seq_at = 0;
        self.large_out_seq_at = 0;
        self.oldest_unacked_seq = SEQ_NULL;
        self.highest_ack = seq_mask(0u32.wrapping_sub(1));
        self.unacked_packets.reset(self.window_size);
        self.last_reliable_send_time = None;
        self.last_reliable_resend_time = None;
        self.round_trip_time = if self.is_internal() {
            INTERNAL_INITIAL_RTT
        } else {
            EXTERNAL_INITIAL_RTT
        };
        self.unacked_critical_seq = SEQ_NULL;
        self.has_seen_overflow_warning = false;
        self.send_window_warn_threshold = self.initial_send_window_warn_threshold;

        self.in_seq_at = 0;
        self.unreliable_in_seq_at = SEQ_NULL;
        self.buffered_receives.reset(self.window_size);
        self.fragments.clear();
        self.acks_to_send.clear();

        self.has_remote_failed = false;
        self.wants_first_packet = false;
        self.base.counters = Default::default();

        if self.is_indexed() {
            self.version = seq_next(self.version);
            self.creation_version = self.version;
        }

        ctx.irregular.del_if_necessary(self.key);
        ctx.keep_alive.del_if_necessary(self.key);
        ctx.delayed.remove(self.key);
        ctx.requests.cancel_requests_for(self.key, Reason::ChannelLost);
        self.base.stop_inactivity_detection();
        self.base.clear_bundle();
        self.base.set_addr(None);
    }

    /// Starts over with a new peer address. A channel that was talking to a
    /// peer waits for that peer's next create-channel packet.
    pub(crate) fn reset(
        &mut self,
        new_addr: Option<SocketAddr>,
        warn_on_discard: bool,
        ctx: &mut NetworkContext,
        now: Instant,
    ) {
        if ctx.delayed.remove(self.key) {
            if let Err(reason) = self.send(ctx, now) {
                debug!("Channel {:?}: delayed send before reset failed: {}", self.key, reason);
            }
        }

        let was_established = self.is_established();
        self.clear_state(warn_on_discard, ctx);
        self.base.set_addr(new_addr);
        self.base.on_packet_received(0, now);
        if was_established && new_addr.is_some() {
            self.wants_first_packet = true;
        }
    }
}
