use std::{default::Default, time::Duration};

use crate::constants::DEFAULT_MIN_INACTIVITY_RESEND_DELAY;

/// Contains Config properties which will be used by a `NetworkInterface`
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Whether the interface faces untrusted clients. External interfaces
    /// never create channels on request and drop once-off reliable traffic.
    pub is_external: bool,
    /// Used to configure every channel created by the interface
    pub channel: ChannelConfig,
    /// Liveness checks for anonymous channels
    pub keep_alive: KeepAliveConfig,
    /// Deferred destruction of condemned channels
    pub condemned: CondemnedConfig,
    /// How often irregular channels are checked for resends
    pub irregular_resend_period: Duration,
    /// Limits on the number of packets queued behind a full window
    pub overflow: OverflowConfig,
    /// Retry policy for transient socket errors
    pub send_retry: SendRetryConfig,
    /// Resend policy for reliable packets sent without a channel
    pub once_off: OnceOffConfig,
    /// Artificial loss and latency, for testing. `None` disables it.
    pub link_conditioner: Option<LinkConditionerConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            is_external: false,
            channel: ChannelConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            condemned: CondemnedConfig::default(),
            irregular_resend_period: Duration::from_secs(1),
            overflow: OverflowConfig::default(),
            send_retry: SendRetryConfig::default(),
            once_off: OnceOffConfig::default(),
            link_conditioner: None,
        }
    }
}

/// Per-channel tuning
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Lower bound on the delay before an unacked packet is resent, and
    /// on how long the window may stay stalled before an overflow packet is
    /// forced out
    pub min_inactivity_resend_delay: Duration,
    /// Once this many acks are pending, a packet is sent to carry them
    pub push_unsent_acks_threshold: usize,
    /// Fraction of the send window in use above which internal channels
    /// start warning
    pub send_window_warn_ratio: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            min_inactivity_resend_delay: DEFAULT_MIN_INACTIVITY_RESEND_DELAY,
            push_unsent_acks_threshold: usize::MAX,
            send_window_warn_ratio: 0.25,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KeepAliveConfig {
    /// Interval at which idle anonymous channels are pinged. The check
    /// itself runs at half this interval.
    pub ping_period: Duration,
    /// Silence after which an anonymous channel's peer is declared failed
    pub timeout_period: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_millis(2500),
            timeout_period: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CondemnedConfig {
    /// Condemned channels silent in both directions for this long are
    /// destroyed even with packets outstanding
    pub age_limit: Duration,
}

impl Default for CondemnedConfig {
    fn default() -> Self {
        Self {
            age_limit: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OverflowConfig {
    pub max_external: u32,
    pub max_internal: u32,
    pub max_indexed: u32,
    /// Panic instead of warning once a channel exceeds its maximum. Only
    /// useful for catching runaway senders during development.
    pub assert_on_max_packets: bool,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            max_external: 1024,
            max_internal: 8192,
            max_indexed: 4096,
            assert_on_max_packets: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SendRetryConfig {
    pub max_retries: u32,
    /// How long to wait for the socket to drain before retrying
    pub writable_wait: Duration,
}

impl Default for SendRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            writable_wait: Duration::from_millis(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnceOffConfig {
    pub resend_period: Duration,
    pub max_resends: u32,
}

impl OnceOffConfig {
    /// How long a sender keeps resending a once-off packet
    pub fn receive_window(&self) -> Duration {
        self.resend_period * self.max_resends
    }
}

impl Default for OnceOffConfig {
    fn default() -> Self {
        Self {
            resend_period: Duration::from_secs(1),
            max_resends: 50,
        }
    }
}

/// Artificial network conditions applied to outgoing packets
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConditionerConfig {
    /// Fraction of packets dropped, between 0 and 1
    pub loss_ratio: f32,
    /// Shortest added delay
    pub min_latency: Duration,
    /// Longest added delay
    pub max_latency: Duration,
}

impl LinkConditionerConfig {
    pub fn new(loss_ratio: f32, min_latency: Duration, max_latency: Duration) -> Self {
        Self {
            loss_ratio: loss_ratio.clamp(0.0, 1.0),
            min_latency,
            max_latency: max_latency.max(min_latency),
        }
    }

    /// Whether this configuration alters traffic at all
    pub fn is_active(&self) -> bool {
        self.loss_ratio > 0.0 || !self.max_latency.is_zero()
    }

    /// A good connection: low latency, no loss
    pub fn good_condition() -> Self {
        Self::new(0.0, Duration::from_millis(20), Duration::from_millis(40))
    }

    /// An average connection with occasional loss
    pub fn average_condition() -> Self {
        Self::new(0.02, Duration::from_millis(80), Duration::from_millis(120))
    }

    /// A poor connection with heavy loss and jitter
    pub fn poor_condition() -> Self {
        Self::new(0.1, Duration::from_millis(150), Duration::from_millis(350))
    }
}
