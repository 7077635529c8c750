use std::{
    io,
    net::SocketAddr,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    bundle::Bundle,
    channel::UdpChannel,
    config::{LinkConditionerConfig, NetworkConfig, SendRetryConfig},
    interface::{RequestManager, TimerTarget},
    packet::Packet,
    reason::Reason,
    stats::SendingStats,
    timer::{TimeQueue, TimerQueue},
    wrapping_number::{SeqNum, SeqNumAllocator},
};

use super::{
    link_conditioner::{Conditioned, LinkConditioner},
    once_off::OnceOffSender,
    PacketFilter, PacketSocket, PacketTransmit,
};

/// Owns the socket and everything between a finished packet and the wire:
/// filters, artificial conditions, retries and once-off resends
pub struct Transmitter {
    socket: Box<dyn PacketSocket>,
    conditioner: Option<LinkConditioner>,
    delayed: TimeQueue<(SocketAddr, Vec<u8>)>,
    should_drop_next_send: bool,
    retry: SendRetryConfig,
    stats: SendingStats,
    once_off: OnceOffSender,
}

impl Transmitter {
    pub fn new(socket: Box<dyn PacketSocket>, config: &NetworkConfig) -> Self {
        let conditioner = config
            .link_conditioner
            .clone()
            .filter(|conditioner| conditioner.is_active())
            .map(LinkConditioner::new);
        Self {
            socket,
            conditioner,
            delayed: TimeQueue::new(),
            should_drop_next_send: false,
            retry: config.send_retry.clone(),
            stats: SendingStats::default(),
            once_off: OnceOffSender::new(config.once_off.clone()),
        }
    }

    pub fn socket(&self) -> &dyn PacketSocket {
        self.socket.as_ref()
    }

    pub fn socket_mut(&mut self) -> &mut dyn PacketSocket {
        self.socket.as_mut()
    }

    pub fn stats(&self) -> &SendingStats {
        &self.stats
    }

    /// Applies a pending forced drop, then artificial conditions, before
    /// handing the datagram to the socket
    fn reschedule_send(
        &mut self,
        addr: SocketAddr,
        data: Vec<u8>,
        now: Instant,
    ) -> Result<(), Reason> {
        if self.should_drop_next_send {
            self.should_drop_next_send = false;
            self.stats.num_packets_dropped += 1;
            debug!("Dropping packet to {} on request", addr);
            return Ok(());
        }

        if let Some(conditioner) = self.conditioner.as_mut() {
            match conditioner.condition(now) {
                Conditioned::Drop => {
                    self.stats.num_packets_dropped += 1;
                    trace!("Link conditioner dropped packet to {}", addr);
                    return Ok(());
                }
                Conditioned::SendAt(instant) => {
                    self.delayed.add_item(instant, (addr, data));
                    return Ok(());
                }
                Conditioned::SendNow => {}
            }
        }

        self.basic_send_with_retries(&addr, &data)
    }

    /// Sends a datagram, retrying transient failures a bounded number of
    /// times
    fn basic_send_with_retries(&mut self, addr: &SocketAddr, data: &[u8]) -> Result<(), Reason> {
        let mut attempts = 0;
        let mut should_wait = false;
        loop {
            let result = if should_wait {
                self.socket.send_to_within(data, addr, self.retry.writable_wait)
            } else {
                self.socket.send_to(data, addr)
            };
            let error = match result {
                Ok(_) => {
                    self.stats.num_packets_sent += 1;
                    self.stats.num_bytes_sent += data.len() as u64;
                    return Ok(());
                }
                Err(error) => error,
            };

            let reason = Reason::from(&error);
            if !reason.is_transient() || attempts >= self.retry.max_retries {
                self.stats.num_send_failures += 1;
                warn!(
                    "Failed to send {} bytes to {} after {} attempts: {}",
                    data.len(),
                    addr,
                    attempts + 1,
                    error
                );
                return Err(reason);
            }
            attempts += 1;

            // A refused port is a stale ICMP report for an earlier packet
            should_wait = reason != Reason::NoSuchPort;
        }
    }

    /// Sends the conditioned packets whose latency has elapsed
    pub fn flush_delayed(&mut self, now: Instant) {
        while let Some((addr, data)) = self.delayed.pop_item(now) {
            if let Err(reason) = self.basic_send_with_retries(&addr, &data) {
                debug!("Delayed send to {} failed: {}", addr, reason);
            }
        }
    }

    /// Resends once-off packets that have not been acked in time
    pub fn resend_once_offs(&mut self, now: Instant) {
        for (addr, data) in self.once_off.take_due(now) {
            self.stats.num_packets_resent += 1;
            if let Err(reason) = self.reschedule_send(addr, data, now) {
                debug!("Once-off resend to {} failed: {}", addr, reason);
            }
        }
    }

    pub fn handle_once_off_ack(&mut self, addr: &SocketAddr, seq: SeqNum) -> bool {
        self.once_off.handle_ack(addr, seq)
    }

    pub fn num_once_off_packets(&self) -> usize {
        self.once_off.len()
    }

    /// Earliest time at which a delayed or once-off packet is due
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.delayed.next_instant(), self.once_off.next_deadline()) {
            (Some(delayed), Some(once_off)) => Some(delayed.min(once_off)),
            (delayed, once_off) => delayed.or(once_off),
        }
    }

    pub fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.socket.recv_from(buf)
    }
}

impl PacketTransmit for Transmitter {
    fn send_packet(
        &mut self,
        addr: &SocketAddr,
        packet: &Packet,
        filter: Option<&mut dyn PacketFilter>,
        is_resend: bool,
        now: Instant,
    ) -> Result<(), Reason> {
        if is_resend {
            self.stats.num_packets_resent += 1;
        }
        if packet.is_reliable() {
            self.stats.num_reliable_packets_sent += 1;
        }
        if !packet.is_on_channel() {
            self.stats.num_off_channel_packets_sent += 1;
        }
        self.stats.num_piggybacks_sent += packet.piggybacks().len() as u64;

        let mut data = packet.encode();

        if !packet.is_on_channel() && packet.is_reliable() && !is_resend {
            self.once_off.add(*addr, packet.seq(), data.clone(), now);
        }

        if let Some(filter) = filter {
            data = filter.send(addr, data);
        }

        self.reschedule_send(*addr, data, now)
    }
}

/// Turns bundles into packets and sends them, on a channel or off one
pub struct PacketSender {
    pub(crate) transmitter: Transmitter,
    seq_allocator: SeqNumAllocator,
}

impl PacketSender {
    pub fn new(socket: Box<dyn PacketSocket>, config: &NetworkConfig) -> Self {
        Self {
            transmitter: Transmitter::new(socket, config),
            seq_allocator: SeqNumAllocator::default(),
        }
    }

    /// Finalises and sends `bundle` to `addr`.
    ///
    /// Requests in the bundle are registered and given their reply ids
    /// first. On a channel, reliable packets that do not fit in the window
    /// stay queued on the channel and go out as acks arrive.
    pub fn send(
        &mut self,
        addr: SocketAddr,
        bundle: &mut Bundle,
        mut channel: Option<&mut UdpChannel>,
        requests: &mut RequestManager,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) -> Result<(), Reason> {
        bundle.finalise();

        if bundle.has_requests() {
            let channel_key = channel.as_deref().map(UdpChannel::key);
            for request in bundle.take_requests() {
                let reply_id =
                    requests.add(request.handler, channel_key, addr, request.timeout, timers, now);
                bundle.set_reply_id(request.packet_index, request.offset, reply_id);
            }
        }

        let num_to_send = bundle.prepare_packets(
            channel.as_deref_mut(),
            &mut self.seq_allocator,
            &mut self.transmitter,
            now,
        );

        let mut result = Ok(());
        for packet in &bundle.packets()[..num_to_send] {
            let filter = channel.as_deref_mut().and_then(UdpChannel::filter_mut);
            if let Err(reason) = self
                .transmitter
                .send_packet(&addr, packet, filter, false, now)
            {
                result = Err(reason);
            }
        }
        result
    }

    /// Acknowledges a reliable packet that arrived without a channel
    pub fn send_ack(&mut self, addr: SocketAddr, seq: SeqNum, now: Instant) -> Result<(), Reason> {
        let mut packet = Packet::new();
        packet.add_ack(seq);
        self.transmitter.send_packet(&addr, &packet, None, false, now)
    }

    /// Drops the next packet handed to the socket, for testing
    pub fn drop_next_send(&mut self) {
        self.transmitter.should_drop_next_send = true;
    }

    pub fn set_loss_ratio(&mut self, loss_ratio: f32) {
        self.conditioner_mut().set_loss_ratio(loss_ratio);
    }

    pub fn set_latency(&mut self, min_latency: Duration, max_latency: Duration) {
        self.conditioner_mut().set_latency(min_latency, max_latency);
    }

    fn conditioner_mut(&mut self) -> &mut LinkConditioner {
        self.transmitter.conditioner.get_or_insert_with(|| {
            LinkConditioner::new(LinkConditionerConfig::new(0.0, Duration::ZERO, Duration::ZERO))
        })
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut Transmitter {
        &mut self.transmitter
    }

    pub fn stats(&self) -> &SendingStats {
        self.transmitter.stats()
    }
}
