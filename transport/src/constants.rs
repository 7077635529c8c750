use std::time::Duration;

/// Largest datagram the transport will put on the wire
pub const PACKET_MAX_SIZE: usize = 1472;
/// Size of the flags header at the front of every packet
pub const PACKET_HEADER_SIZE: usize = 2;
/// Footer room a bundle leaves free in each packet for channel footers
pub const PACKET_FOOTER_RESERVE: usize = 24;

/// Most individual acks a single packet may carry
pub const MAX_ACKS: usize = 255;

pub const EXTERNAL_WINDOW_SIZE: u32 = 256;
pub const INTERNAL_WINDOW_SIZE: u32 = 4096;
pub const INDEXED_WINDOW_SIZE: u32 = 512;

/// Receive window size beyond which a packet is rejected outright
pub const MAX_RECEIVE_WINDOW_SIZE: u32 = 1 << 16;

/// Initial round trip time estimate for external channels
pub const EXTERNAL_INITIAL_RTT: Duration = Duration::from_secs(1);
/// Initial round trip time estimate for internal channels
pub const INTERNAL_INITIAL_RTT: Duration = Duration::from_millis(100);

pub const DEFAULT_MIN_INACTIVITY_RESEND_DELAY: Duration = Duration::from_secs(1);
