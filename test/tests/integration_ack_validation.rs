/// Integration tests for acknowledgement validation on receive
/// These tests feed hand-built packets to an interface and verify that a
/// packet carrying any bad ack changes no channel state
use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    net::SocketAddr,
    rc::Rc,
    time::{Duration, Instant},
};

use wicket_test::init_logging;
use wicket_transport::{
    ChannelKey, ChannelTraits, NetworkConfig, NetworkInterface, Packet, PacketFlags,
    PacketSocket,
};

/// A socket whose incoming datagrams are queued by the test
#[derive(Clone, Default)]
struct ScriptedSocket {
    inbox: Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>,
}

impl PacketSocket for ScriptedSocket {
    fn send_to(&mut self, data: &[u8], _addr: &SocketAddr) -> io::Result<usize> {
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inbox.borrow_mut().pop_front() {
            Some((data, src)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(Some((data.len(), src)))
            }
            None => Ok(None),
        }
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.inbox.borrow().is_empty())
    }

    fn send_to_within(
        &mut self,
        data: &[u8],
        _addr: &SocketAddr,
        _timeout: Duration,
    ) -> io::Result<usize> {
        Ok(data.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok("127.0.0.1:41000".parse().unwrap())
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:41001".parse().unwrap()
}

fn ack_packet(cumulative_ack: u32, acks: &[u32]) -> Vec<u8> {
    let mut packet = Packet::new();
    packet.enable_flags(PacketFlags::ON_CHANNEL);
    packet.set_cumulative_ack(cumulative_ack);
    for ack in acks {
        packet.add_ack(*ack);
    }
    packet.encode()
}

fn channel_with_unacked(count: usize) -> (NetworkInterface, ScriptedSocket, ChannelKey, Instant) {
    let socket = ScriptedSocket::default();
    let mut interface = NetworkInterface::new(Box::new(socket.clone()), NetworkConfig::default());
    let now = Instant::now();
    let key = interface.find_or_create_channel(peer(), ChannelTraits::Internal, now);
    for index in 0..count {
        interface
            .bundle_mut(key)
            .unwrap()
            .add_message(&[index as u8], true)
            .unwrap();
        interface.send(key, now).unwrap();
    }
    assert_eq!(interface.channel(key).unwrap().num_unacked_packets(), count);
    (interface, socket, key, now)
}

#[test]
fn bad_individual_ack_leaves_cumulative_ack_unapplied() {
    init_logging();
    let (mut interface, socket, key, now) = channel_with_unacked(3);

    socket
        .inbox
        .borrow_mut()
        .push_back((ack_packet(2, &[u32::MAX]), peer()));
    interface.process_at(now);

    assert_eq!(interface.receiving_stats().num_corrupted_packets, 1);
    assert_eq!(interface.channel(key).unwrap().num_unacked_packets(), 3);
    assert_eq!(interface.channel(key).unwrap().oldest_unacked_seq(), 0);

    socket.inbox.borrow_mut().push_back((ack_packet(2, &[2]), peer()));
    interface.process_at(now);

    assert_eq!(interface.receiving_stats().num_corrupted_packets, 1);
    assert_eq!(interface.channel(key).unwrap().num_unacked_packets(), 0);
}

#[test]
fn cumulative_ack_for_unsent_packets_applies_nothing() {
    init_logging();
    let (mut interface, socket, key, now) = channel_with_unacked(2);

    socket.inbox.borrow_mut().push_back((ack_packet(9, &[0]), peer()));
    interface.process_at(now);

    assert_eq!(interface.receiving_stats().num_corrupted_packets, 1);
    assert_eq!(interface.channel(key).unwrap().num_unacked_packets(), 2);
}
