use std::{net::SocketAddr, time::Instant};

use crate::{packet::Packet, reason::Reason};

use super::PacketFilter;

/// Puts a finished packet on the wire
pub trait PacketTransmit {
    fn send_packet(
        &mut self,
        addr: &SocketAddr,
        packet: &Packet,
        filter: Option<&mut dyn PacketFilter>,
        is_resend: bool,
        now: Instant,
    ) -> Result<(), Reason>;
}
