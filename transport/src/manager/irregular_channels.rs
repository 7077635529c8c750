use std::time::{Duration, Instant};

use log::trace;

use crate::{
    channel::{ChannelStore, UdpChannel},
    interface::TimerTarget,
    timer::TimerQueue,
    types::ChannelKey,
};

use super::MonitoredChannels;

/// Channels that are not sent on every tick and still have unacked packets.
/// Their resend timers are only checked when this collection's timer fires.
pub struct IrregularChannels {
    monitored: MonitoredChannels,
}

impl IrregularChannels {
    pub fn new(period: Duration) -> Self {
        Self {
            monitored: MonitoredChannels::new(TimerTarget::IrregularChannels, period),
        }
    }

    /// Adds `channel` if it is irregular and waiting on acks
    pub fn add_if_necessary(
        &mut self,
        channel: &UdpChannel,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) {
        if channel.is_irregular() && channel.has_unacked_packets() {
            self.monitored.add(channel.key(), timers, now);
        }
    }

    pub fn del_if_necessary(&mut self, key: ChannelKey) {
        self.monitored.remove(key);
    }

    /// Drops the channels with nothing left to resend and returns the ones
    /// to be sent, which checks their resend timers
    pub fn handle_timeout(&mut self, channels: &ChannelStore) -> Vec<ChannelKey> {
        let mut to_send = Vec::new();

        for key in self.monitored.keys() {
            match channels.get(&key) {
                Some(channel) if !channel.has_remote_failed() && channel.has_unacked_packets() => {
                    to_send.push(key);
                }
                _ => {
                    trace!("Channel {:?} no longer needs irregular resends", key);
                    self.monitored.remove(key);
                }
            }
        }

        to_send
    }

    pub fn contains(&self, key: ChannelKey) -> bool {
        self.monitored.contains(key)
    }

    pub fn len(&self) -> usize {
        self.monitored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitored.is_empty()
    }

    pub fn period(&self) -> Duration {
        self.monitored.period()
    }

    pub fn set_period(
        &mut self,
        period: Duration,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) {
        self.monitored.set_period(period, timers, now);
    }
}
