use std::time::{Duration, Instant};

use crate::config::LinkConditionerConfig;

/// Decides the fate of outgoing packets under artificial network
/// conditions
pub struct LinkConditioner {
    config: LinkConditionerConfig,
    rng: fastrand::Rng,
}

/// What happens to a conditioned packet
#[derive(Debug, PartialEq, Eq)]
pub enum Conditioned {
    Drop,
    SendAt(Instant),
    SendNow,
}

impl LinkConditioner {
    pub fn new(config: LinkConditionerConfig) -> Self {
        Self {
            config,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(config: LinkConditionerConfig, seed: u64) -> Self {
        Self {
            config,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn config(&self) -> &LinkConditionerConfig {
        &self.config
    }

    pub fn set_loss_ratio(&mut self, loss_ratio: f32) {
        self.config.loss_ratio = loss_ratio.clamp(0.0, 1.0);
    }

    pub fn set_latency(&mut self, min_latency: Duration, max_latency: Duration) {
        self.config.min_latency = min_latency;
        self.config.max_latency = max_latency.max(min_latency);
    }

    pub fn condition(&mut self, now: Instant) -> Conditioned {
        if self.config.loss_ratio > 0.0 && self.rng.f32() < self.config.loss_ratio {
            return Conditioned::Drop;
        }

        let min = self.config.min_latency.as_millis() as u64;
        let max = self.config.max_latency.as_millis() as u64;
        if max == 0 {
            return Conditioned::SendNow;
        }
        let latency = Duration::from_millis(self.rng.u64(min..=max));
        Conditioned::SendAt(now + latency)
    }
}
