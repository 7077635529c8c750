use std::net::SocketAddr;

/// Transforms a channel's encoded packets on their way to and from the
/// socket, e.g. to encrypt them
pub trait PacketFilter {
    /// Transforms an outgoing packet
    fn send(&mut self, addr: &SocketAddr, data: Vec<u8>) -> Vec<u8>;
    /// Reverses `send`. Returns `None` to drop the packet.
    fn recv(&mut self, addr: &SocketAddr, data: Vec<u8>) -> Option<Vec<u8>>;
    /// Most bytes `send` may add to a packet
    fn max_spare_size(&self) -> usize {
        0
    }
}
