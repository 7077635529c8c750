/// Bit flags carried in the two byte packet header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u16);

impl PacketFlags {
    /// Reserved for request metadata, never set by this transport
    pub const HAS_REQUESTS: u16 = 0x0001;
    pub const HAS_PIGGYBACKS: u16 = 0x0002;
    pub const HAS_ACKS: u16 = 0x0004;
    pub const ON_CHANNEL: u16 = 0x0008;
    pub const IS_RELIABLE: u16 = 0x0010;
    pub const IS_FRAGMENT: u16 = 0x0020;
    pub const HAS_SEQUENCE_NUMBER: u16 = 0x0040;
    pub const INDEXED_CHANNEL: u16 = 0x0080;
    pub const CREATE_CHANNEL: u16 = 0x0200;
    pub const HAS_CUMULATIVE_ACK: u16 = 0x0400;

    /// Every flag a well-formed packet may carry
    pub const KNOWN: u16 = Self::HAS_REQUESTS
        | Self::HAS_PIGGYBACKS
        | Self::HAS_ACKS
        | Self::ON_CHANNEL
        | Self::IS_RELIABLE
        | Self::IS_FRAGMENT
        | Self::HAS_SEQUENCE_NUMBER
        | Self::INDEXED_CHANNEL
        | Self::CREATE_CHANNEL
        | Self::HAS_CUMULATIVE_ACK;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Whether every flag in `flags` is set
    pub fn contains(&self, flags: u16) -> bool {
        self.0 & flags == flags
    }

    pub fn insert(&mut self, flags: u16) {
        self.0 |= flags;
    }

    pub fn remove(&mut self, flags: u16) {
        self.0 &= !flags;
    }

    /// Bits that are not known flags
    pub fn unknown(&self) -> u16 {
        self.0 & !Self::KNOWN
    }
}
