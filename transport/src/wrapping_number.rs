use thiserror::Error;

/// A 28-bit cyclic packet sequence number, stored in a `u32`.
pub type SeqNum = u32;

/// Number of distinct sequence numbers.
pub const SEQ_SIZE: u32 = 0x1000_0000;
/// Mask that maps any `u32` into the sequence space.
pub const SEQ_MASK: u32 = SEQ_SIZE - 1;
/// Sentinel meaning "no sequence number". Never a valid sequence.
pub const SEQ_NULL: SeqNum = SEQ_SIZE;

/// Errors that can occur during sequence number operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrappingNumberError {
    /// The value has bits set outside of the sequence space
    #[error("Sequence number {seq:#x} is outside of the 28-bit sequence space")]
    InvalidSequence { seq: u32 },

    /// The distance between two sequence numbers does not fit in an i32.
    /// This cannot happen for values inside the sequence space.
    #[error("Distance from {a:#x} to {b:#x} is out of range")]
    DistanceOutOfRange { a: u32, b: u32 },
}

/// Maps a value into the sequence space
#[inline]
pub fn seq_mask(value: u32) -> SeqNum {
    value & SEQ_MASK
}

/// Returns whether `seq` lies within the sequence space (`SEQ_NULL` does not)
#[inline]
pub fn is_valid_seq(seq: u32) -> bool {
    seq_mask(seq) == seq
}

/// Returns the sequence number following `seq`
#[inline]
pub fn seq_next(seq: SeqNum) -> SeqNum {
    seq_mask(seq.wrapping_add(1))
}

/// Returns the sequence number `n` steps after `seq`
#[inline]
pub fn seq_add(seq: SeqNum, n: u32) -> SeqNum {
    seq_mask(seq.wrapping_add(n))
}

/// Number of steps forward from `from` to `to`, modulo the sequence space.
#[inline]
pub fn seq_distance(from: SeqNum, to: SeqNum) -> u32 {
    seq_mask(to.wrapping_sub(from))
}

/// Returns whether or not a sequence number is less than another,
/// taking wraparound into account.
/// seq_less_than(1, 2) will return true
/// seq_less_than(SEQ_MASK, 0) will return true
/// seq_less_than(1, 1) will return false
#[inline]
pub fn seq_less_than(a: SeqNum, b: SeqNum) -> bool {
    seq_mask(a.wrapping_sub(b)) > SEQ_SIZE / 2
}

/// Returns whether or not a sequence number is greater than another
/// seq_greater_than(2, 1) will return true
/// seq_greater_than(0, SEQ_MASK) will return true
/// seq_greater_than(1, 1) will return false
#[inline]
pub fn seq_greater_than(a: SeqNum, b: SeqNum) -> bool {
    seq_less_than(b, a)
}

/// Retrieves the signed wrapping difference from `a` to `b`.
///
/// # Examples
/// ```
/// # use wicket_transport::{try_seq_diff, SEQ_MASK};
/// assert_eq!(try_seq_diff(1, 2).unwrap(), 1);
/// assert_eq!(try_seq_diff(2, 1).unwrap(), -1);
/// assert_eq!(try_seq_diff(SEQ_MASK, 0).unwrap(), 1);
/// assert_eq!(try_seq_diff(0, SEQ_MASK).unwrap(), -1);
/// ```
pub fn try_seq_diff(a: SeqNum, b: SeqNum) -> Result<i32, WrappingNumberError> {
    if !is_valid_seq(a) {
        return Err(WrappingNumberError::InvalidSequence { seq: a });
    }
    if !is_valid_seq(b) {
        return Err(WrappingNumberError::InvalidSequence { seq: b });
    }

    let forward = seq_distance(a, b);
    let result = if forward > SEQ_SIZE / 2 {
        i64::from(forward) - i64::from(SEQ_SIZE)
    } else {
        i64::from(forward)
    };

    i32::try_from(result).map_err(|_| WrappingNumberError::DistanceOutOfRange { a, b })
}

/// Hands out consecutive sequence numbers for packets that are not sent on a
/// channel (once-off reliable and unreliable off-channel packets).
#[derive(Debug, Clone)]
pub struct SeqNumAllocator {
    next: SeqNum,
}

impl SeqNumAllocator {
    pub fn new(first: SeqNum) -> Self {
        Self {
            next: seq_mask(first),
        }
    }

    /// Returns the next sequence number and advances the allocator
    pub fn next_seq(&mut self) -> SeqNum {
        let seq = self.next;
        self.next = seq_next(seq);
        seq
    }
}

impl Default for SeqNumAllocator {
    fn default() -> Self {
        Self::new(fastrand::u32(..SEQ_SIZE))
    }
}
