use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use log::{trace, warn};

use crate::{config::OnceOffConfig, timer::Timer, wrapping_number::SeqNum};

/// Sequence numbers remembered per peer for duplicate detection
const ONCE_OFF_RECEIVE_HISTORY: usize = 256;

struct OnceOffPacket {
    data: Vec<u8>,
    timer: Timer,
    num_resends: u32,
}

/// Resends reliable packets sent without a channel until they are acked
pub struct OnceOffSender {
    packets: HashMap<(SocketAddr, SeqNum), OnceOffPacket>,
    config: OnceOffConfig,
}

impl OnceOffSender {
    pub fn new(config: OnceOffConfig) -> Self {
        Self {
            packets: HashMap::new(),
            config,
        }
    }

    /// Tracks an encoded packet for resending
    pub fn add(&mut self, addr: SocketAddr, seq: SeqNum, data: Vec<u8>, now: Instant) {
        self.packets.insert(
            (addr, seq),
            OnceOffPacket {
                data,
                timer: Timer::new(self.config.resend_period, now),
                num_resends: 0,
            },
        );
    }

    /// Stops resending the acked packet. Returns whether it was tracked.
    pub fn handle_ack(&mut self, addr: &SocketAddr, seq: SeqNum) -> bool {
        self.packets.remove(&(*addr, seq)).is_some()
    }

    /// Collects the packets due for a resend. Packets that used up their
    /// resends are given up on.
    pub fn take_due(&mut self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        let max_resends = self.config.max_resends;
        let mut due = Vec::new();

        self.packets.retain(|(addr, seq), packet| {
            if !packet.timer.ringing(now) {
                return true;
            }
            if packet.num_resends >= max_resends {
                warn!(
                    "Giving up on once-off packet {} to {} after {} resends",
                    seq, addr, packet.num_resends
                );
                return false;
            }
            packet.num_resends += 1;
            packet.timer.reset(now);
            due.push((*addr, packet.data.clone()));
            true
        });

        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.packets
            .values()
            .map(|packet| packet.timer.deadline())
            .min()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

struct ReceiveHistory {
    seqs: VecDeque<SeqNum>,
    last_received: Instant,
}

/// Filters duplicates of reliable packets received without a channel
#[derive(Default)]
pub struct OnceOffReceiver {
    seen: HashMap<SocketAddr, ReceiveHistory>,
}

impl OnceOffReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a packet. Returns false if it was seen before.
    pub fn on_received(&mut self, addr: &SocketAddr, seq: SeqNum, now: Instant) -> bool {
        let history = self.seen.entry(*addr).or_insert_with(|| ReceiveHistory {
            seqs: VecDeque::new(),
            last_received: now,
        });
        history.last_received = now;
        if history.seqs.contains(&seq) {
            return false;
        }
        if history.seqs.len() == ONCE_OFF_RECEIVE_HISTORY {
            history.seqs.pop_front();
        }
        history.seqs.push_back(seq);
        true
    }

    /// Forgets peers silent for longer than `max_age`. Their resends have
    /// stopped by then, so no duplicate can still arrive.
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) {
        self.seen.retain(|addr, history| {
            let is_stale = now.saturating_duration_since(history.last_received) > max_age;
            if is_stale {
                trace!("Forgetting once-off history of {}", addr);
            }
            !is_stale
        });
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
