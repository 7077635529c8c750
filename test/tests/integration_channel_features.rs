/// Integration tests for per-channel features
/// These tests cover indexed channels, packet filters, bundle primers,
/// critical resends, idle and deferred sends, and channel resets
use std::{
    cell::RefCell,
    collections::HashMap,
    net::SocketAddr,
    rc::Rc,
    time::Duration,
};

use wicket_test::{init_logging, TestNetwork};
use wicket_transport::{
    Bundle, BundlePrimer, ChannelFinder, ChannelId, ChannelKey, ChannelTraits, FinderResult,
    NetworkConfig, Packet, PacketFilter, Reason,
};

const STEP: Duration = Duration::from_millis(50);

struct MapFinder {
    channels: HashMap<ChannelId, ChannelKey>,
    handled: Rc<RefCell<Vec<ChannelId>>>,
}

impl MapFinder {
    fn new(channels: &[(ChannelId, ChannelKey)]) -> Self {
        Self {
            channels: channels.iter().copied().collect(),
            handled: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl ChannelFinder for MapFinder {
    fn find(&mut self, id: ChannelId, _source: &SocketAddr, _packet: &Packet) -> FinderResult {
        match self.channels.get(&id) {
            Some(key) => FinderResult::Found(*key),
            None => {
                self.handled.borrow_mut().push(id);
                FinderResult::Handled
            }
        }
    }
}

struct XorFilter(u8);

impl PacketFilter for XorFilter {
    fn send(&mut self, _addr: &SocketAddr, data: Vec<u8>) -> Vec<u8> {
        data.into_iter().map(|byte| byte ^ self.0).collect()
    }

    fn recv(&mut self, _addr: &SocketAddr, data: Vec<u8>) -> Option<Vec<u8>> {
        Some(data.into_iter().map(|byte| byte ^ self.0).collect())
    }
}

struct HeaderPrimer;

impl BundlePrimer for HeaderPrimer {
    fn prime_bundle(&mut self, bundle: &mut Bundle) {
        bundle.add_message(b"header", false).unwrap();
    }

    fn num_unreliable_messages(&self) -> usize {
        1
    }
}

#[test]
fn indexed_channels_are_resolved_by_the_finder() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let now = network.now();
    let server_addr = network.server.addr;
    let client_addr = network.client.addr;

    let client_key = network
        .client
        .interface
        .create_indexed_channel(server_addr, 7, ChannelTraits::Internal, now);
    let stray_key = network
        .client
        .interface
        .create_indexed_channel(server_addr, 9, ChannelTraits::Internal, now);
    let server_key = network
        .server
        .interface
        .create_indexed_channel(client_addr, 7, ChannelTraits::Internal, now);
    network.client.interface.set_is_local_regular(client_key, false, now);
    network.server.interface.set_is_local_regular(server_key, false, now);

    let server_finder = MapFinder::new(&[(7, server_key)]);
    let handled = server_finder.handled.clone();
    network.server.interface.register_channel_finder(Box::new(server_finder));
    network
        .client
        .interface
        .register_channel_finder(Box::new(MapFinder::new(&[(7, client_key), (9, stray_key)])));

    network.client.send_message(client_key, b"indexed", true, now);
    network.client.send_message(stray_key, b"stray", false, now);

    // Indexed channels are not in the address map, so ask the channel itself
    let acked = network.run_until(Duration::from_secs(10), STEP, |network| {
        !network.client.interface.channel(client_key).unwrap().has_unacked_packets()
    });
    assert!(acked, "indexed packet was never acked");

    let messages = network.server.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel, Some(server_key));
    assert_eq!(messages[0].data, b"indexed");
    assert_eq!(*handled.borrow(), vec![9]);

    // Indexed channels never create anonymous ones
    assert!(network.server.created_channels().is_empty());
}

#[test]
fn filtered_channels_exchange_packets() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let server_key = network.server_channel(ChannelTraits::Internal, false);
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    network
        .server
        .interface
        .set_channel_filter(server_key, Some(Box::new(XorFilter(0x5A))));
    network
        .client
        .interface
        .set_channel_filter(client_key, Some(Box::new(XorFilter(0x5A))));

    let now = network.now();
    network.client.send_message(client_key, b"secret", true, now);

    let acked = network.run_until(Duration::from_secs(10), STEP, |network| {
        !network.client.interface.has_unacked_packets()
    });
    assert!(acked, "filtered ack never arrived");
    assert_eq!(network.server.message_data(), vec![b"secret".to_vec()]);
    assert_eq!(network.server.interface.receiving_stats().num_corrupted_packets, 0);
    assert_eq!(network.client.interface.receiving_stats().num_corrupted_packets, 0);
}

#[test]
fn filtered_packets_are_unreadable_without_the_filter() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    network
        .client
        .interface
        .set_channel_filter(client_key, Some(Box::new(XorFilter(0x5A))));

    let now = network.now();
    network.client.send_message(client_key, b"secret", true, now);
    network.run_for(Duration::from_millis(500), STEP);

    assert!(network.server.messages().is_empty());
    assert!(network.server.created_channels().is_empty());
    assert!(network.server.interface.receiving_stats().num_corrupted_packets > 0);
}

#[test]
fn primed_messages_ride_along_but_never_force_a_send() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    network
        .client
        .interface
        .channel_mut(key)
        .unwrap()
        .set_bundle_primer(Some(Box::new(HeaderPrimer)));

    let now = network.now();
    network.client.send_message(key, b"body", true, now);
    let num_sent = network.client.interface.sending_stats().num_packets_sent;

    // Only the primer's message is queued now
    network.client.interface.send(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent);

    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        network.server.messages().len() >= 2
    }));
    assert_eq!(
        network.server.message_data(),
        vec![b"header".to_vec(), b"body".to_vec()]
    );
}

#[test]
fn critical_packets_are_resent_on_demand() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    network.client_link.set_down(true);

    let now = network.now();
    let bundle = network.client.interface.bundle_mut(key).unwrap();
    bundle.add_message(b"critical", true).unwrap();
    bundle.set_critical();
    network.client.interface.send(key, now).unwrap();

    network.step(Duration::from_millis(100));
    assert!(network.server.messages().is_empty());

    network.client_link.set_down(false);
    let now = network.now();
    network.client.interface.resend_criticals(key, now);
    network.step(Duration::from_millis(10));

    assert_eq!(network.server.message_data(), vec![b"critical".to_vec()]);
    assert!(network.client.interface.sending_stats().num_packets_resent >= 1);
}

#[test]
fn idle_send_flushes_only_idle_established_channels() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);

    // Nothing queued means nothing to flush
    let now = network.now();
    network.client.interface.send_if_idle(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, 0);

    network.client.send_message(key, b"first", true, now);
    let num_sent = network.client.interface.sending_stats().num_packets_sent;

    // A reliable send just went out, so the channel is busy
    network
        .client
        .interface
        .bundle_mut(key)
        .unwrap()
        .add_message(b"queued", true)
        .unwrap();
    network.client.interface.send_if_idle(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent);

    network.run_for(Duration::from_millis(600), STEP);
    let now = network.now();
    network.client.interface.send_if_idle(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent + 1);

    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        network.server.messages().len() >= 2
    }));
    assert_eq!(
        network.server.message_data(),
        vec![b"first".to_vec(), b"queued".to_vec()]
    );

    // A channel without a peer never sends
    let now = network.now();
    network.client.interface.reset_channel(key, None, false, now);
    network
        .client
        .interface
        .bundle_mut(key)
        .unwrap()
        .add_message(b"nowhere", true)
        .unwrap();
    network.run_for(Duration::from_secs(1), STEP);
    let num_sent = network.client.interface.sending_stats().num_packets_sent;
    let now = network.now();
    network.client.interface.send_if_idle(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent);
}

#[test]
fn delayed_sends_share_one_packet() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    let num_sent = network.client.interface.sending_stats().num_packets_sent;
    let now = network.now();

    for data in [b"first".as_slice(), b"second".as_slice()] {
        let bundle = network.client.interface.bundle_mut(key).unwrap();
        bundle.add_message(data, true).unwrap();
        network.client.interface.delayed_send(key);
    }
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent);

    network.client.interface.send_if_delayed(key, now).unwrap();
    network.client.interface.send_if_delayed(key, now).unwrap();
    assert_eq!(network.client.interface.sending_stats().num_packets_sent, num_sent + 1);

    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        network.server.messages().len() >= 2
    }));
    assert_eq!(
        network.server.message_data(),
        vec![b"first".to_vec(), b"second".to_vec()]
    );
}

#[test]
fn reset_channel_forgets_its_peer() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    let server_addr = network.server.addr;

    let now = network.now();
    network.client.send_message(key, b"before", true, now);
    network.client.interface.reset_channel(key, None, false, now);

    assert!(!network.client.interface.channel(key).unwrap().has_unacked_packets());
    assert_eq!(
        network.client.interface.find_channel(server_addr, false, now),
        None
    );

    network
        .client
        .interface
        .bundle_mut(key)
        .unwrap()
        .add_message(b"after", true)
        .unwrap();
    assert_eq!(
        network.client.interface.send(key, now),
        Err(Reason::NoChannel)
    );
}

#[test]
fn conflicting_reset_keeps_the_address_with_its_owner() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let server_addr = network.server.addr;
    let elsewhere: SocketAddr = "127.0.0.1:49999".parse().unwrap();
    let first = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    let interface = &mut network.client.interface;
    interface.reset_channel(first, Some(elsewhere), false, now);
    assert_eq!(interface.find_channel(elsewhere, false, now), Some(first));

    let second = interface.find_or_create_channel(server_addr, ChannelTraits::Internal, now);
    assert_ne!(first, second);

    // The server address already belongs to the second channel
    interface.reset_channel(first, Some(server_addr), false, now);
    assert_eq!(interface.find_channel(server_addr, false, now), Some(second));
    assert_eq!(interface.find_channel(elsewhere, false, now), None);

    assert!(interface.destroy_channel(first));
    assert_eq!(interface.find_channel(server_addr, false, now), Some(second));
}
