use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::{
    channel::ChannelStore,
    config::KeepAliveConfig,
    interface::TimerTarget,
    timer::TimerQueue,
    types::ChannelKey,
};

use super::MonitoredChannels;

/// What a keep-alive check found
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeepAliveCheck {
    /// Idle channels that should send a reliable ping
    pub pings: Vec<ChannelKey>,
    /// Channels whose peer has been silent past the timeout
    pub failures: Vec<ChannelKey>,
}

/// Anonymous channels, pinged while idle and failed once their peer stays
/// silent for the timeout period
pub struct KeepAliveChannels {
    monitored: MonitoredChannels,
    timeout_period: Duration,
    last_timeout: Option<Instant>,
    num_pings_sent: u64,
}

impl KeepAliveChannels {
    pub fn new(config: &KeepAliveConfig) -> Self {
        Self {
            monitored: MonitoredChannels::new(
                TimerTarget::KeepAliveChannels,
                config.ping_period / 2,
            ),
            timeout_period: config.timeout_period,
            last_timeout: None,
            num_pings_sent: 0,
        }
    }

    pub fn add_if_necessary(
        &mut self,
        key: ChannelKey,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) {
        if self.monitored.add(key, timers, now) {
            self.last_timeout = None;
        }
    }

    pub fn del_if_necessary(&mut self, key: ChannelKey) {
        self.monitored.remove(key);
    }

    /// Checks every monitored channel. Missing channels are dropped.
    ///
    /// If the check itself ran late, by more than twice its period, the
    /// process was stalled and silence is not held against the peers:
    /// failures are suspended for this round.
    pub fn handle_timeout(&mut self, channels: &ChannelStore, now: Instant) -> KeepAliveCheck {
        let period = self.monitored.period();
        let was_stalled = self
            .last_timeout
            .map_or(false, |last| now.saturating_duration_since(last) > period * 2);
        if was_stalled {
            warn!(
                "Keep-alive check is late by {:?}, not failing silent channels this round",
                now.saturating_duration_since(self.last_timeout.unwrap_or(now))
            );
        }
        self.last_timeout = Some(now);

        let mut check = KeepAliveCheck::default();
        for key in self.monitored.keys() {
            let Some(channel) = channels.get(&key) else {
                self.monitored.remove(key);
                continue;
            };
            if channel.has_remote_failed() {
                continue;
            }

            let last_received = channel.last_received_time();
            if !was_stalled && now.saturating_duration_since(last_received) > self.timeout_period {
                warn!(
                    "Channel {:?} to {:?}: nothing received for {:?}",
                    key,
                    channel.addr(),
                    now.saturating_duration_since(last_received)
                );
                check.failures.push(key);
                continue;
            }

            let last_activity = channel
                .last_reliable_send_or_resend_time()
                .map_or(last_received, |sent| sent.max(last_received));
            if now.saturating_duration_since(last_activity) > period * 2 {
                trace!("Pinging idle channel {:?}", key);
                check.pings.push(key);
            }
        }

        self.num_pings_sent += check.pings.len() as u64;
        check
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

    /// Total pings requested since creation
    pub fn num_pings_sent(&self) -> u64 {
        self.num_pings_sent
    }

    pub fn timeout_period(&self) -> Duration {
        self.timeout_period
    }

    pub fn set_timeout_period(&mut self, timeout_period: Duration) {
        self.timeout_period = timeout_period;
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
        self.last_timeout = None;
        self.monitored.set_period(period, timers, now);
    }
}
