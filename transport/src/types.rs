/// Identifier of an indexed channel, shared under a single peer address
pub type ChannelId = i32;
/// Incremented each time an indexed channel is reset or handed off
pub type ChannelVersion = u32;
/// Identifies an outstanding request awaiting a reply
pub type ReplyId = u32;

/// Channel id used by channels that are not indexed
pub const CHANNEL_ID_NULL: ChannelId = 0;

/// Handle to a channel owned by a `NetworkInterface`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(u64);

impl ChannelKey {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(&self) -> u64 {
        self.0
    }
}

/// Whether a channel talks to a trusted peer inside the cluster or to an
/// untrusted client outside of it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelTraits {
    External,
    Internal,
}

impl ChannelTraits {
    pub fn is_external(self) -> bool {
        self == ChannelTraits::External
    }

    pub fn is_internal(self) -> bool {
        self == ChannelTraits::Internal
    }
}

/// Observable lifecycle of a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Created on first contact, not yet claimed by the application
    Anonymous,
    Established,
    /// Marked for deletion, still answering acks
    Condemned,
    Destroyed,
}

/// Generates unique `ChannelKey`s for the lifetime of an interface
#[derive(Debug, Default)]
pub struct KeyGenerator {
    next: u64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn generate(&mut self) -> ChannelKey {
        let key = ChannelKey(self.next.max(1));
        self.next = key.0 + 1;
        key
    }
}
