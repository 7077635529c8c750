use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use crate::{
    bundle::{Bundle, BundlePrimer},
    interface::TimerTarget,
    timer::{TimerGuard, TimerQueue},
    types::ChannelKey,
};

/// Traffic counters kept per channel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub num_bundles_sent: u64,
    pub num_packets_received: u64,
    pub num_bytes_received: u64,
    pub num_reliable_packets_sent: u64,
    pub num_packets_resent: u64,
}

struct InactivityDetection {
    period: Duration,
    _timer: TimerGuard,
}

/// State shared by every kind of channel: the peer address, the bundle
/// being built, bundle priming and inactivity detection
pub struct ChannelBase {
    addr: Option<SocketAddr>,
    bundle: Bundle,
    bundle_primer: Option<Box<dyn BundlePrimer>>,
    footer_reserve: usize,
    last_received_time: Instant,
    inactivity: Option<InactivityDetection>,
    pub(crate) counters: ChannelCounters,
}

impl ChannelBase {
    pub fn new(addr: Option<SocketAddr>, footer_reserve: usize, now: Instant) -> Self {
        Self {
            addr,
            bundle: Bundle::with_footer_reserve(footer_reserve),
            bundle_primer: None,
            footer_reserve,
            last_received_time: now,
            inactivity: None,
            counters: ChannelCounters::default(),
        }
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn set_addr(&mut self, addr: Option<SocketAddr>) {
        self.addr = addr;
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    fn new_bundle(&mut self) -> Bundle {
        let mut bundle = Bundle::with_footer_reserve(self.footer_reserve);
        if let Some(primer) = self.bundle_primer.as_mut() {
            primer.prime_bundle(&mut bundle);
        }
        bundle
    }

    /// Hands over the bundle being built, leaving a freshly primed one
    pub fn take_bundle(&mut self) -> Bundle {
        let fresh = self.new_bundle();
        std::mem::replace(&mut self.bundle, fresh)
    }

    /// Discards the bundle being built
    pub fn clear_bundle(&mut self) {
        self.bundle = self.new_bundle();
    }

    pub fn set_bundle_primer(&mut self, primer: Option<Box<dyn BundlePrimer>>) {
        self.bundle_primer = primer;
        self.clear_bundle();
    }

    pub(crate) fn set_footer_reserve(&mut self, footer_reserve: usize) {
        self.footer_reserve = footer_reserve;
        self.clear_bundle();
    }

    /// Whether `bundle` holds more than the primer put in it
    pub fn bundle_has_unsent_data(&self, bundle: &Bundle) -> bool {
        let num_primed = self
            .bundle_primer
            .as_ref()
            .map_or(0, |primer| primer.num_unreliable_messages());
        bundle.num_messages() > num_primed || bundle.has_piggybacks() || bundle.is_reliable()
    }

    pub fn last_received_time(&self) -> Instant {
        self.last_received_time
    }

    pub(crate) fn on_packet_received(&mut self, num_bytes: usize, now: Instant) {
        self.last_received_time = now;
        self.counters.num_packets_received += 1;
        self.counters.num_bytes_received += num_bytes as u64;
    }

    /// Reports the channel inactive when nothing has been received for
    /// `period`, checking every `check_period`
    pub(crate) fn start_inactivity_detection(
        &mut self,
        key: ChannelKey,
        period: Duration,
        check_period: Duration,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) {
        let timer = timers.add_timer(now, check_period, TimerTarget::InactivityCheck(key));
        self.last_received_time = now;
        self.inactivity = Some(InactivityDetection {
            period,
            _timer: timer,
        });
    }

    pub(crate) fn stop_inactivity_detection(&mut self) {
        self.inactivity = None;
    }

    /// Whether the inactivity period has passed without a packet
    pub(crate) fn is_inactive(&self, now: Instant) -> bool {
        self.inactivity.as_ref().map_or(false, |detection| {
            now.saturating_duration_since(self.last_received_time) > detection.period
        })
    }

    pub fn counters(&self) -> &ChannelCounters {
        &self.counters
    }
}
