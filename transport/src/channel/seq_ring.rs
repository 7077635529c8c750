use crate::wrapping_number::{seq_add, SeqNum};

/// Fixed capacity ring of slots addressed by sequence number.
///
/// Every live entry must lie within one capacity of the others; callers grow
/// the ring with `double_size` before inserting further out.
pub struct SeqRing<T> {
    slots: Vec<Option<(SeqNum, T)>>,
    len: usize,
}

impl<T> SeqRing<T> {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1).next_power_of_two() as usize;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, len: 0 }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn index(&self, seq: SeqNum) -> usize {
        seq as usize & (self.slots.len() - 1)
    }

    pub fn contains(&self, seq: SeqNum) -> bool {
        self.get(seq).is_some()
    }

    pub fn get(&self, seq: SeqNum) -> Option<&T> {
        match &self.slots[self.index(seq)] {
            Some((stored, item)) if *stored == seq => Some(item),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, seq: SeqNum) -> Option<&mut T> {
        let index = self.index(seq);
        match &mut self.slots[index] {
            Some((stored, item)) if *stored == seq => Some(item),
            _ => None,
        }
    }

    /// Stores `item` at `seq`, returning whatever occupied the slot
    pub fn insert(&mut self, seq: SeqNum, item: T) -> Option<T> {
        let index = self.index(seq);
        let previous = self.slots[index].replace((seq, item));
        if previous.is_none() {
            self.len += 1;
        }
        previous.map(|(_, item)| item)
    }

    pub fn remove(&mut self, seq: SeqNum) -> Option<T> {
        if !self.contains(seq) {
            return None;
        }
        let index = self.index(seq);
        self.len -= 1;
        self.slots[index].take().map(|(_, item)| item)
    }

    /// Doubles the capacity. Entries are expected to lie within one
    /// capacity starting at `start_seq`.
    pub fn double_size(&mut self, start_seq: SeqNum) {
        let old_capacity = self.slots.len();
        let mut old_slots = std::mem::take(&mut self.slots);
        self.slots.resize_with(old_capacity * 2, || None);
        self.len = 0;

        for offset in 0..old_capacity as u32 {
            let seq = seq_add(start_seq, offset);
            let slot = &mut old_slots[seq as usize & (old_capacity - 1)];
            if let Some((stored, item)) = slot.take() {
                self.insert(stored, item);
            }
        }
    }

    /// Empties the ring and shrinks it back to `capacity`
    pub fn reset(&mut self, capacity: u32) {
        *self = Self::new(capacity);
    }
}
