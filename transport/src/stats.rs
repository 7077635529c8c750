/// Counters for everything an interface has put on the wire
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendingStats {
    pub num_packets_sent: u64,
    pub num_bytes_sent: u64,
    pub num_packets_resent: u64,
    pub num_reliable_packets_sent: u64,
    pub num_off_channel_packets_sent: u64,
    pub num_piggybacks_sent: u64,
    /// Packets dropped on purpose, by the link conditioner or a test
    pub num_packets_dropped: u64,
    pub num_send_failures: u64,
}

/// Counters for everything an interface has read from the wire
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceivingStats {
    pub num_packets_received: u64,
    pub num_bytes_received: u64,
    pub num_corrupted_packets: u64,
    pub num_duplicate_packets: u64,
    pub num_out_of_window_packets: u64,
    pub num_piggybacks_received: u64,
    pub num_acks_received: u64,
    pub num_messages_received: u64,
}
