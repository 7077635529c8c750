use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use crate::{
    interface::TimerTarget,
    timer::{TimerGuard, TimerQueue},
    types::ChannelKey,
};

/// A set of channels checked together on one recurring timer. The timer is
/// armed while the set is non-empty.
pub struct MonitoredChannels {
    keys: BTreeSet<ChannelKey>,
    period: Option<Duration>,
    default_period: Duration,
    target: TimerTarget,
    timer: Option<TimerGuard>,
}

impl MonitoredChannels {
    pub fn new(target: TimerTarget, default_period: Duration) -> Self {
        Self {
            keys: BTreeSet::new(),
            period: None,
            default_period,
            target,
            timer: None,
        }
    }

    /// The check period, falling back to the default until one is set
    pub fn period(&self) -> Duration {
        self.period.unwrap_or(self.default_period)
    }

    /// Changes the check period, re-arming the timer if it is running
    pub fn set_period(
        &mut self,
        period: Duration,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) {
        self.period = Some(period);
        if self.timer.is_some() {
            self.arm(timers, now);
        }
    }

    fn arm(&mut self, timers: &mut TimerQueue<TimerTarget>, now: Instant) {
        self.timer = Some(timers.add_timer(now, self.period(), self.target));
    }

    /// Adds a channel. Returns true if the timer was armed by this call.
    pub fn add(
        &mut self,
        key: ChannelKey,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) -> bool {
        self.keys.insert(key);
        if self.timer.is_none() {
            self.arm(timers, now);
            return true;
        }
        false
    }

    /// Removes a channel, disarming the timer once the set is empty
    pub fn remove(&mut self, key: ChannelKey) -> bool {
        let removed = self.keys.remove(&key);
        if self.keys.is_empty() {
            self.stop_monitoring();
        }
        removed
    }

    pub fn contains(&self, key: ChannelKey) -> bool {
        self.keys.contains(&key)
    }

    /// Snapshot of the monitored keys, in key order
    pub fn keys(&self) -> Vec<ChannelKey> {
        self.keys.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_monitoring(&self) -> bool {
        self.timer.is_some()
    }

    pub fn stop_monitoring(&mut self) {
        self.timer = None;
    }
}
