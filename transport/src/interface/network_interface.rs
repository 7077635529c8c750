use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    bundle::Bundle,
    channel::{ChannelStore, UdpChannel},
    config::NetworkConfig,
    manager::{ChannelMapError, CondemnedChannels, IrregularChannels, KeepAliveChannels},
    reason::Reason,
    sender::{PacketFilter, PacketSocket, UdpPacketSocket},
    stats::{ReceivingStats, SendingStats},
    types::{ChannelId, ChannelKey, ChannelState, ChannelTraits, KeyGenerator},
};

use super::{ChannelFinder, InterfaceEvent, NetworkContext, PacketReceiver, TimerTarget};

const MAX_CHANNEL_DRAIN_WAIT: Duration = Duration::from_millis(100);

/// Owns a socket and every channel multiplexed over it, and drives them:
/// receiving, timers, deferred sends and teardown.
///
/// Single-threaded. Call `process_once` (or `process_at` with an explicit
/// clock) in a loop and drain `take_events` after each call.
pub struct NetworkInterface {
    pub(crate) channels: ChannelStore,
    pub(crate) ctx: NetworkContext,
    pub(crate) receiver: PacketReceiver,
    pub(crate) finder: Option<Box<dyn ChannelFinder>>,
    key_generator: KeyGenerator,
    is_shut_down: bool,
}

impl NetworkInterface {
    pub fn new(socket: Box<dyn PacketSocket>, config: NetworkConfig) -> Self {
        Self {
            channels: ChannelStore::new(),
            ctx: NetworkContext::new(socket, config),
            receiver: PacketReceiver::new(),
            finder: None,
            key_generator: KeyGenerator::new(),
            is_shut_down: false,
        }
    }

    /// Binds a UDP socket and creates an interface on it
    pub fn bind<A: ToSocketAddrs>(addr: A, config: NetworkConfig) -> io::Result<Self> {
        let socket = UdpPacketSocket::bind(addr)?;
        let interface = Self::new(Box::new(socket), config);
        info!("Network interface bound to {:?}", interface.local_addr());
        Ok(interface)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.sender.transmitter().socket().local_addr()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.ctx.config
    }

    pub fn register_channel_finder(&mut self, finder: Box<dyn ChannelFinder>) {
        self.finder = Some(finder);
    }

    // Channels

    fn new_channel(
        &mut self,
        addr: Option<SocketAddr>,
        traits: ChannelTraits,
        id: Option<ChannelId>,
        now: Instant,
    ) -> ChannelKey {
        let key = self.key_generator.generate();
        let channel = match id {
            Some(id) => UdpChannel::new_indexed(key, addr, traits, id, &self.ctx.config, now),
            None => UdpChannel::new(key, addr, traits, &self.ctx.config, now),
        };
        self.channels.insert(key, channel);
        key
    }

    /// Returns the channel to `addr`, creating it if needed. An anonymous
    /// channel is claimed: it stops being keep-alive checked and is no
    /// longer owned by the interface.
    pub fn find_or_create_channel(
        &mut self,
        addr: SocketAddr,
        traits: ChannelTraits,
        now: Instant,
    ) -> ChannelKey {
        if let Some(key) = self.ctx.channel_map.find(&addr) {
            if let Some(channel) = self.channels.get_mut(&key) {
                if channel.is_condemned() {
                    warn!("Channel {:?} to {} is condemned and cannot be claimed", key, addr);
                } else if channel.is_anonymous() {
                    info!("Claiming anonymous channel {:?} to {}", key, addr);
                    channel.set_is_anonymous(false, &mut self.ctx, now);
                    self.ctx.channel_map.set_owned(key, false);
                }
                return key;
            }
        }

        let key = self.new_channel(Some(addr), traits, None, now);
        if let Err(error) = self.ctx.channel_map.add(addr, key) {
            warn!("Channel {:?} created for a mapped address: {}", key, error);
        }
        key
    }

    /// Creates a channel to `addr` that the caller manages
    pub fn create_channel(
        &mut self,
        addr: SocketAddr,
        traits: ChannelTraits,
        now: Instant,
    ) -> Result<ChannelKey, ChannelMapError> {
        if let Some(existing) = self.ctx.channel_map.find(&addr) {
            return Err(ChannelMapError::AddressInUse { addr, existing });
        }
        let key = self.new_channel(Some(addr), traits, None, now);
        self.ctx.channel_map.add(addr, key)?;
        Ok(key)
    }

    /// Creates an indexed channel. Incoming packets reach it through the
    /// registered `ChannelFinder`.
    pub fn create_indexed_channel(
        &mut self,
        addr: SocketAddr,
        id: ChannelId,
        traits: ChannelTraits,
        now: Instant,
    ) -> ChannelKey {
        self.new_channel(Some(addr), traits, Some(id), now)
    }

    /// Looks up the channel to `addr`, creating an anonymous one if asked to
    pub fn find_channel(
        &mut self,
        addr: SocketAddr,
        create_anonymous: bool,
        now: Instant,
    ) -> Option<ChannelKey> {
        if let Some(key) = self.ctx.channel_map.find(&addr) {
            return Some(key);
        }
        if !create_anonymous {
            return None;
        }

        let traits = if self.ctx.config.is_external {
            ChannelTraits::External
        } else {
            ChannelTraits::Internal
        };
        let key = self.new_channel(Some(addr), traits, None, now);
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.set_is_anonymous(true, &mut self.ctx, now);
        }
        if let Err(error) = self.ctx.channel_map.add(addr, key) {
            warn!("Anonymous channel {:?} created for a mapped address: {}", key, error);
        }
        self.ctx.channel_map.set_owned(key, true);

        info!("Created anonymous channel {:?} to {}", key, addr);
        self.ctx
            .events
            .push(InterfaceEvent::ChannelCreated { channel: key, addr });
        Some(key)
    }

    pub fn channel(&self, key: ChannelKey) -> Option<&UdpChannel> {
        self.channels.get(&key)
    }

    pub fn channel_mut(&mut self, key: ChannelKey) -> Option<&mut UdpChannel> {
        self.channels.get_mut(&key)
    }

    pub fn channel_state(&self, key: ChannelKey) -> ChannelState {
        self.channels
            .get(&key)
            .map_or(ChannelState::Destroyed, UdpChannel::state)
    }

    pub fn bundle_mut(&mut self, key: ChannelKey) -> Option<&mut Bundle> {
        self.channels.get_mut(&key).map(UdpChannel::bundle_mut)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn set_channel_filter(&mut self, key: ChannelKey, filter: Option<Box<dyn PacketFilter>>) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.set_filter(filter);
        }
    }

    pub fn set_is_local_regular(&mut self, key: ChannelKey, is_regular: bool, now: Instant) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.set_is_local_regular(is_regular, &mut self.ctx, now);
        }
    }

    pub fn set_is_remote_regular(&mut self, key: ChannelKey, is_regular: bool, now: Instant) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.set_is_remote_regular(is_regular, &mut self.ctx, now);
        }
    }

    /// Reports the channel inactive once nothing has been received for
    /// `period`
    pub fn start_inactivity_detection(
        &mut self,
        key: ChannelKey,
        period: Duration,
        check_period: Duration,
        now: Instant,
    ) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.start_inactivity_detection(period, check_period, &mut self.ctx, now);
        }
    }

    /// Points a channel at a new peer, discarding all of its state
    pub fn reset_channel(
        &mut self,
        key: ChannelKey,
        new_addr: Option<SocketAddr>,
        warn_on_discard: bool,
        now: Instant,
    ) {
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };
        let old_addr = channel.addr();
        channel.reset(new_addr, warn_on_discard, &mut self.ctx, now);

        if channel.is_indexed() || old_addr == new_addr {
            return;
        }
        if let Some(old_addr) = old_addr {
            if let Err(error) = self.ctx.channel_map.remove(&old_addr, key) {
                warn!("Channel {:?} reset: {}", key, error);
            }
        }
        if let Some(new_addr) = new_addr {
            if let Err(error) = self.ctx.channel_map.add(new_addr, key) {
                warn!("Channel {:?} reset: {}", key, error);
            }
        }
    }

    // Sending

    /// Sends the channel's bundle
    pub fn send(&mut self, key: ChannelKey, now: Instant) -> Result<(), Reason> {
        let channel = self.channels.get_mut(&key).ok_or(Reason::NoChannel)?;
        channel.send(&mut self.ctx, now)
    }

    /// Sends a bundle built outside of the channel
    pub fn send_bundle(
        &mut self,
        key: ChannelKey,
        bundle: &mut Bundle,
        now: Instant,
    ) -> Result<(), Reason> {
        let channel = self.channels.get_mut(&key).ok_or(Reason::NoChannel)?;
        channel.send_bundle(bundle, &mut self.ctx, now)
    }

    /// Sends a bundle without a channel. Reliable packets are resent until
    /// the peer acks them.
    pub fn send_off_channel(
        &mut self,
        addr: SocketAddr,
        bundle: &mut Bundle,
        now: Instant,
    ) -> Result<(), Reason> {
        let ctx = &mut self.ctx;
        ctx.sender
            .send(addr, bundle, None, &mut ctx.requests, &mut ctx.timers, now)
    }

    /// Defers the channel's send to the end of the tick
    pub fn delayed_send(&mut self, key: ChannelKey) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.delayed_send(&mut self.ctx);
        }
    }

    /// Performs a deferred send now, if one is pending
    pub fn send_if_delayed(&mut self, key: ChannelKey, now: Instant) -> Result<(), Reason> {
        if !self.ctx.delayed.remove(key) {
            return Ok(());
        }
        self.send(key, now)
    }

    pub fn send_if_idle(&mut self, key: ChannelKey, now: Instant) -> Result<(), Reason> {
        let channel = self.channels.get_mut(&key).ok_or(Reason::NoChannel)?;
        channel.send_if_idle(&mut self.ctx, now)
    }

    /// Resends every unacked packet up to the last critical one
    pub fn resend_criticals(&mut self, key: ChannelKey, now: Instant) {
        if let Some(channel) = self.channels.get_mut(&key) {
            channel.resend_criticals(&mut self.ctx.sender.transmitter, now);
        }
    }

    // Lifecycle

    /// Condemns a channel. It is destroyed right away if nothing is
    /// outstanding, otherwise once its packets are acknowledged or it ages
    /// out.
    pub fn condemn_channel(&mut self, key: ChannelKey, now: Instant) -> bool {
        let Some(channel) = self.channels.get_mut(&key) else {
            return false;
        };
        if !channel.condemn(&mut self.ctx, now) {
            return false;
        }
        let to_destroy = self.ctx.condemned.add(channel, &mut self.ctx.timers, now);
        for key in to_destroy {
            self.destroy_channel(key);
        }
        true
    }

    /// Condemns the anonymous channel to `addr`, if there is one
    pub fn del_anonymous(&mut self, addr: &SocketAddr, now: Instant) -> bool {
        match self.ctx.channel_map.del_anonymous(addr, &self.channels) {
            Some(key) => self.condemn_channel(key, now),
            None => false,
        }
    }

    /// Removes a channel immediately, discarding anything outstanding
    pub fn destroy_channel(&mut self, key: ChannelKey) -> bool {
        let Some(mut channel) = self.channels.remove(&key) else {
            return false;
        };

        if let Some(addr) = channel.addr() {
            if !channel.is_indexed() && self.ctx.channel_map.find(&addr) == Some(key) {
                if let Err(error) = self.ctx.channel_map.remove(&addr, key) {
                    warn!("Channel {:?} destroyed: {}", key, error);
                }
            }
        }
        self.ctx.condemned.remove(key);
        self.ctx.delayed.remove(key);

        info!("Destroying channel {:?} to {:?}", key, channel.addr());
        let warn_on_discard = !channel.has_remote_failed();
        channel.clear_state(warn_on_discard, &mut self.ctx);
        self.ctx
            .events
            .push(InterfaceEvent::ChannelDestroyed { channel: key });
        true
    }

    /// Marks the channel's peer as dead. Anonymous channels are condemned,
    /// which destroys them.
    pub fn set_remote_failed(&mut self, key: ChannelKey, now: Instant) {
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };
        if !channel.set_remote_failed(&mut self.ctx) {
            return;
        }

        if let Some(addr) = channel.addr() {
            self.ctx
                .events
                .push(InterfaceEvent::ChannelFailed { channel: key, addr });
        }
        self.ctx.keep_alive.del_if_necessary(key);
        self.ctx.irregular.del_if_necessary(key);

        if channel.is_condemned() {
            if self.ctx.condemned.check(key, channel, now) {
                self.destroy_channel(key);
            }
        } else if channel.is_anonymous() {
            if let Some(addr) = channel.addr() {
                if let Err(error) = self.ctx.channel_map.remove(&addr, key) {
                    warn!("Failed anonymous channel {:?}: {}", key, error);
                }
            }
            self.condemn_channel(key, now);
        }
    }

    /// Destroys the condemned channels with nothing left to deliver
    pub fn delete_finished_channels(&mut self, now: Instant) {
        let finished = self
            .ctx
            .condemned
            .delete_finished_channels(&self.channels, now);
        for key in finished {
            self.destroy_channel(key);
        }
    }

    /// Whether any live channel still waits for acks
    pub fn has_unacked_packets(&self) -> bool {
        self.ctx.channel_map.has_unacked_packets(&self.channels)
            || self.ctx.condemned.keys().iter().any(|key| {
                self.channels
                    .get(key)
                    .map_or(false, UdpChannel::has_unacked_packets)
            })
    }

    /// Fails outstanding requests and destroys the channels the interface
    /// owns. Channels created by the application are left to it.
    pub fn shut_down(&mut self) {
        if self.is_shut_down {
            return;
        }
        self.is_shut_down = true;

        self.ctx.requests.cancel_all(Reason::ShuttingDown);
        let owned = self.ctx.channel_map.destroy_owned_channels(&self.channels);
        for key in owned {
            self.destroy_channel(key);
        }
        info!("Network interface shut down");
    }

    // Processing

    /// Dispatches every timer due at `now`
    pub fn handle_timers(&mut self, now: Instant) {
        while let Some(target) = self.ctx.timers.pop_expired(now) {
            match target {
                TimerTarget::IrregularChannels => {
                    let to_send = self.ctx.irregular.handle_timeout(&self.channels);
                    for key in to_send {
                        if let Err(reason) = self.send(key, now) {
                            debug!("Irregular resend on {:?} failed: {}", key, reason);
                        }
                    }
                }
                TimerTarget::KeepAliveChannels => {
                    let check = self.ctx.keep_alive.handle_timeout(&self.channels, now);
                    for key in check.failures {
                        self.ctx.keep_alive.del_if_necessary(key);
                        self.set_remote_failed(key, now);
                    }
                    for key in check.pings {
                        if let Some(channel) = self.channels.get_mut(&key) {
                            channel.bundle_mut().reliable();
                            if let Err(reason) = channel.send(&mut self.ctx, now) {
                                debug!("Keep-alive ping on {:?} failed: {}", key, reason);
                            }
                        }
                    }
                }
                TimerTarget::CondemnedChannels => self.delete_finished_channels(now),
                TimerTarget::InactivityCheck(key) => self.check_inactivity(key, now),
                TimerTarget::RequestTimeout(reply_id) => self.ctx.requests.handle_timeout(reply_id),
                TimerTarget::OffChannelEviction => {
                    let max_age = self.ctx.config.once_off.receive_window();
                    self.receiver.evict_stale(now, max_age);
                }
            }
        }
    }

    fn check_inactivity(&mut self, key: ChannelKey, now: Instant) {
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };
        if !channel.base().is_inactive(now) {
            return;
        }
        channel.base_mut().stop_inactivity_detection();
        if let Some(addr) = channel.addr() {
            warn!(
                "Channel {:?} to {}: nothing received for {:?}",
                key,
                addr,
                now.saturating_duration_since(channel.last_received_time())
            );
            self.ctx
                .events
                .push(InterfaceEvent::ChannelInactive { channel: key, addr });
        }
    }

    /// End of tick: deferred channel sends, then delayed and once-off
    /// packets that are due
    pub fn tick(&mut self, now: Instant) {
        for key in self.ctx.delayed.take_all() {
            if let Err(reason) = self.send(key, now) {
                debug!("Delayed send on {:?} failed: {}", key, reason);
            }
        }
        self.ctx.sender.transmitter.flush_delayed(now);
        self.ctx.sender.transmitter.resend_once_offs(now);
    }

    /// Processes every datagram waiting on the socket. Returns how many were
    /// read.
    pub fn receive_pending(&mut self, now: Instant) -> usize {
        let mut num_received = 0;
        let mut buffer = std::mem::take(&mut self.receiver.buffer);

        loop {
            match self.ctx.sender.transmitter.recv_from(&mut buffer) {
                Ok(Some((length, src))) => {
                    num_received += 1;
                    self.process_packet(src, &buffer[..length], now);
                }
                Ok(None) => break,
                // An earlier send hit a closed port
                Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!("Receive reported a refused port: {}", error);
                }
                Err(error) => {
                    warn!("Receiving failed: {}", error);
                    break;
                }
            }
        }

        self.receiver.buffer = buffer;
        num_received
    }

    /// One full iteration of the event loop at an explicit time
    pub fn process_at(&mut self, now: Instant) -> usize {
        let num_received = self.receive_pending(now);
        self.handle_timers(now);
        self.tick(now);
        num_received
    }

    /// Earliest instant at which a timer or a deferred packet is due
    pub fn next_deadline(&mut self) -> Option<Instant> {
        let timers = self.ctx.timers.next_deadline();
        let packets = self.ctx.sender.transmitter.next_deadline();
        match (timers, packets) {
            (Some(timers), Some(packets)) => Some(timers.min(packets)),
            (timers, packets) => timers.or(packets),
        }
    }

    /// Waits up to `max_wait` for a datagram or the next deadline, then runs
    /// one iteration of the event loop
    pub fn process_once(&mut self, max_wait: Duration) -> io::Result<usize> {
        let start = Instant::now();
        let wait = self
            .next_deadline()
            .map_or(max_wait, |deadline| {
                deadline.saturating_duration_since(start).min(max_wait)
            });

        self.ctx.sender.transmitter.socket_mut().wait_readable(wait)?;
        Ok(self.process_at(Instant::now()))
    }

    /// Runs the event loop until no channel waits for acks, or `timeout`
    /// passes. Returns whether every channel was drained.
    pub fn process_until_channels_empty(&mut self, timeout: Duration) -> io::Result<bool> {
        let start = Instant::now();
        loop {
            if !self.has_unacked_packets() {
                return Ok(true);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(
                    "Channels still have unacked packets after {:?}",
                    timeout
                );
                return Ok(false);
            }
            self.process_once((timeout - elapsed).min(MAX_CHANNEL_DRAIN_WAIT))?;
        }
    }

    /// Drains the events raised since the last call
    pub fn take_events(&mut self) -> Vec<InterfaceEvent> {
        std::mem::take(&mut self.ctx.events)
    }

    // Diagnostics & testing

    pub fn sending_stats(&self) -> &SendingStats {
        self.ctx.sender.stats()
    }

    pub fn receiving_stats(&self) -> &ReceivingStats {
        &self.receiver.stats
    }

    pub fn packet_receiver(&self) -> &PacketReceiver {
        &self.receiver
    }

    pub fn keep_alive(&self) -> &KeepAliveChannels {
        &self.ctx.keep_alive
    }

    pub fn irregular(&self) -> &IrregularChannels {
        &self.ctx.irregular
    }

    pub fn condemned(&self) -> &CondemnedChannels {
        &self.ctx.condemned
    }

    pub fn num_outstanding_requests(&self) -> usize {
        self.ctx.requests.num_outstanding()
    }

    /// Off-channel reliable packets still waiting for an ack
    pub fn num_once_off_packets(&self) -> usize {
        self.ctx.sender.transmitter().num_once_off_packets()
    }

    pub fn set_loss_ratio(&mut self, loss_ratio: f32) {
        self.ctx.sender.set_loss_ratio(loss_ratio);
    }

    pub fn set_latency(&mut self, min_latency: Duration, max_latency: Duration) {
        self.ctx.sender.set_latency(min_latency, max_latency);
    }

    /// Drops the next packet this interface sends
    pub fn drop_next_send(&mut self) {
        self.ctx.sender.drop_next_send();
    }
}

impl Drop for NetworkInterface {
    fn drop(&mut self) {
        self.shut_down();
    }
}
