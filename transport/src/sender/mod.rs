mod filter;
mod link_conditioner;
mod once_off;
mod packet_sender;
mod socket;
mod transmit;

pub use filter::PacketFilter;
pub use link_conditioner::{Conditioned, LinkConditioner};
pub use once_off::{OnceOffReceiver, OnceOffSender};
pub use packet_sender::{PacketSender, Transmitter};
pub use socket::{PacketSocket, UdpPacketSocket};
pub use transmit::PacketTransmit;
