use std::collections::HashSet;

use crate::types::ChannelKey;

/// Channels whose send has been deferred to the end of the current tick
#[derive(Default)]
pub struct DelayedChannels {
    order: Vec<ChannelKey>,
    keys: HashSet<ChannelKey>,
}

impl DelayedChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a channel. Adding it again before it is sent has no effect.
    pub fn add(&mut self, key: ChannelKey) {
        if self.keys.insert(key) {
            self.order.push(key);
        }
    }

    /// Returns true if the channel was queued
    pub fn remove(&mut self, key: ChannelKey) -> bool {
        if !self.keys.remove(&key) {
            return false;
        }
        self.order.retain(|queued| *queued != key);
        true
    }

    pub fn contains(&self, key: ChannelKey) -> bool {
        self.keys.contains(&key)
    }

    /// Empties the queue, in the order channels were added
    pub fn take_all(&mut self) -> Vec<ChannelKey> {
        self.keys.clear();
        std::mem::take(&mut self.order)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
