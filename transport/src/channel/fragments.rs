use log::debug;

use crate::{
    packet::Packet,
    wrapping_number::{is_valid_seq, seq_distance, SeqNum},
};

use super::ReceiverError;

/// Most packets a single bundle may be split into
pub const MAX_FRAGMENTS: u32 = 4096;

struct FragmentedBundle {
    begin: SeqNum,
    slots: Vec<Option<Packet>>,
    received: usize,
}

/// Reassembles the packets of a multi-packet bundle
#[derive(Default)]
pub struct FragmentAssembler {
    current: Option<FragmentedBundle>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Feeds a delivered packet. Returns the packets of a complete bundle, in
    /// sequence order, once every fragment has arrived. Packets that are not
    /// fragments complete immediately.
    pub fn add(&mut self, packet: Packet) -> Result<Option<Vec<Packet>>, ReceiverError> {
        if !packet.is_fragment() {
            return Ok(Some(vec![packet]));
        }

        let begin = packet.fragment_begin();
        let end = packet.fragment_end();
        let seq = packet.seq();
        if !is_valid_seq(begin) || !is_valid_seq(end) || !is_valid_seq(seq) {
            return Err(ReceiverError::InvalidFragmentRange { begin, end, seq });
        }
        let count = seq_distance(begin, end) + 1;
        if count > MAX_FRAGMENTS {
            return Err(ReceiverError::TooManyFragments {
                count,
                max: MAX_FRAGMENTS,
            });
        }
        let offset = seq_distance(begin, seq);
        if offset >= count {
            return Err(ReceiverError::InvalidFragmentRange { begin, end, seq });
        }

        let is_new_bundle = self
            .current
            .as_ref()
            .map_or(true, |bundle| bundle.begin != begin || bundle.slots.len() != count as usize);
        if is_new_bundle {
            if let Some(stale) = self.current.take() {
                debug!(
                    "Discarding incomplete fragmented bundle at {} ({} of {} packets)",
                    stale.begin,
                    stale.received,
                    stale.slots.len()
                );
            }
            let mut slots = Vec::with_capacity(count as usize);
            slots.resize_with(count as usize, || None);
            self.current = Some(FragmentedBundle {
                begin,
                slots,
                received: 0,
            });
        }

        let Some(bundle) = self.current.as_mut() else {
            return Ok(None);
        };
        let slot = &mut bundle.slots[offset as usize];
        if slot.is_none() {
            *slot = Some(packet);
            bundle.received += 1;
        }

        if bundle.received < bundle.slots.len() {
            return Ok(None);
        }
        let complete = self
            .current
            .take()
            .map(|bundle| bundle.slots.into_iter().flatten().collect());
        Ok(complete)
    }

    /// Whether a bundle is partially assembled
    pub fn is_assembling(&self) -> bool {
        self.current.is_some()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
