use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    channel::{ChannelStore, UdpChannel},
    config::CondemnedConfig,
    interface::TimerTarget,
    timer::{TimerGuard, TimerQueue},
    types::{ChannelId, ChannelKey},
};

/// Channels that have been condemned and are waiting for their outstanding
/// packets to be acknowledged before being destroyed
pub struct CondemnedChannels {
    indexed: HashMap<ChannelId, ChannelKey>,
    non_indexed: HashSet<ChannelKey>,
    age_limit: Duration,
    timer: Option<TimerGuard>,
}

impl CondemnedChannels {
    pub fn new(config: &CondemnedConfig) -> Self {
        Self {
            indexed: HashMap::new(),
            non_indexed: HashSet::new(),
            age_limit: config.age_limit,
            timer: None,
        }
    }

    /// Takes ownership of a condemned channel's key. Returns the keys of the
    /// channels to destroy now: an older channel with the same id, and the
    /// channel itself if it has nothing left to deliver.
    pub fn add(
        &mut self,
        channel: &UdpChannel,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) -> Vec<ChannelKey> {
        let key = channel.key();
        let mut to_destroy = Vec::new();

        if channel.is_indexed() {
            if let Some(previous) = self.indexed.insert(channel.id(), key) {
                if previous != key {
                    warn!(
                        "Condemned channel {:?} replaces {:?} with the same id {}",
                        key,
                        previous,
                        channel.id()
                    );
                    to_destroy.push(previous);
                }
            }
        } else {
            self.non_indexed.insert(key);
        }

        if self.should_delete(channel, now) {
            self.remove(key);
            to_destroy.push(key);
        } else if self.timer.is_none() {
            self.timer = Some(timers.add_timer(
                now,
                self.age_limit,
                TimerTarget::CondemnedChannels,
            ));
        }

        to_destroy
    }

    /// Whether a condemned channel can be destroyed
    pub fn should_delete(&self, channel: &UdpChannel, now: Instant) -> bool {
        if !channel.has_unacked_packets() || channel.has_remote_failed() {
            return true;
        }

        let is_silent = |instant: Instant| now.saturating_duration_since(instant) > self.age_limit;
        let has_timed_out = is_silent(channel.last_received_time())
            && channel
                .last_reliable_send_time()
                .map_or(true, is_silent);
        if has_timed_out {
            info!(
                "Condemned channel {:?} to {:?} timed out with packets outstanding",
                channel.key(),
                channel.addr()
            );
        }
        has_timed_out
    }

    /// Checks a single channel, typically after it received an ack. Returns
    /// true if it should be destroyed; it is then no longer tracked.
    pub fn check(&mut self, key: ChannelKey, channel: &UdpChannel, now: Instant) -> bool {
        if !self.should_delete(channel, now) {
            return false;
        }
        self.remove(key);
        true
    }

    /// Returns the keys of every condemned channel that can be destroyed,
    /// and stops tracking them
    pub fn delete_finished_channels(
        &mut self,
        channels: &ChannelStore,
        now: Instant,
    ) -> Vec<ChannelKey> {
        let finished: Vec<ChannelKey> = self
            .keys()
            .into_iter()
            .filter(|key| {
                channels
                    .get(key)
                    .map_or(true, |channel| self.should_delete(channel, now))
            })
            .collect();

        for key in &finished {
            self.remove(*key);
        }
        if !finished.is_empty() {
            debug!("Destroying {} finished condemned channels", finished.len());
        }
        finished
    }

    pub fn find(&self, id: ChannelId) -> Option<ChannelKey> {
        self.indexed.get(&id).copied()
    }

    pub fn contains(&self, key: ChannelKey) -> bool {
        self.non_indexed.contains(&key) || self.indexed.values().any(|indexed| *indexed == key)
    }

    pub fn remove(&mut self, key: ChannelKey) -> bool {
        let mut removed = self.non_indexed.remove(&key);
        let before = self.indexed.len();
        self.indexed.retain(|_, indexed| *indexed != key);
        removed |= self.indexed.len() != before;

        if self.is_empty() {
            self.timer = None;
        }
        removed
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        self.non_indexed
            .iter()
            .chain(self.indexed.values())
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.non_indexed.len() + self.indexed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn age_limit(&self) -> Duration {
        self.age_limit
    }
}
