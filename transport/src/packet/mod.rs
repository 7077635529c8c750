mod error;
mod flags;
mod packet;

pub use error::PacketError;
pub use flags::PacketFlags;
pub use packet::Packet;
