use thiserror::Error;

use crate::wrapping_number::SeqNum;

/// Errors that can occur while applying acknowledgements to a channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// An ack carried a value outside of the sequence space
    #[error("Ack {seq:#x} is not a valid sequence number")]
    InvalidSequence { seq: u32 },

    /// A cumulative ack covers packets that were never sent
    #[error("Cumulative ack {end_seq} is beyond the next unsent sequence {small_out_seq_at}")]
    AckForUnsentPacket {
        end_seq: SeqNum,
        small_out_seq_at: SeqNum,
    },
}

/// Errors that can occur while reassembling a fragmented bundle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverError {
    /// A fragment's range is malformed or does not contain its own sequence
    #[error("Fragment {seq} does not belong to range {begin}..={end}")]
    InvalidFragmentRange {
        begin: SeqNum,
        end: SeqNum,
        seq: SeqNum,
    },

    /// A fragmented bundle claims more packets than allowed
    #[error("Fragmented bundle of {count} packets exceeds the maximum of {max}")]
    TooManyFragments { count: u32, max: u32 },
}
