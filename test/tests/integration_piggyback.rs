/// Integration tests for piggybacked resends on external channels
/// These tests verify that lost packets ride inside newer packets and are
/// still delivered in order

use std::time::Duration;

use wicket_test::{init_logging, TestNetwork};
use wicket_transport::{ChannelTraits, NetworkConfig};

fn external_network() -> TestNetwork {
    TestNetwork::new(NetworkConfig {
        is_external: true,
        ..NetworkConfig::default()
    })
}

#[test]
fn lost_packets_are_piggybacked() {
    init_logging();
    let mut network = external_network();
    let key = network.client_channel(ChannelTraits::External, false);
    network.server_channel(ChannelTraits::External, false);
    network.client_link.drop_next(5);

    let expected: Vec<Vec<u8>> = (0..5u8).map(|index| vec![index; 16]).collect();
    let now = network.now();
    for data in &expected {
        network.client.send_message(key, data, true, now);
    }
    assert_eq!(network.client_link.num_dropped(), 5);

    let delivered = network.run_until(
        Duration::from_secs(30),
        Duration::from_millis(100),
        |network| network.server.messages().len() >= expected.len(),
    );
    assert!(delivered);
    assert_eq!(network.server.message_data(), expected);

    assert!(network.client.interface.sending_stats().num_piggybacks_sent > 0);
    assert!(network.server.interface.receiving_stats().num_piggybacks_received > 0);

    let drained = network.run_until(Duration::from_secs(10), Duration::from_millis(100), |network| {
        !network.client.interface.has_unacked_packets()
    });
    assert!(drained);
}

#[test]
fn fragments_are_resent_whole() {
    init_logging();
    let mut network = external_network();
    let key = network.client_channel(ChannelTraits::External, false);
    network.server_channel(ChannelTraits::External, false);
    let data: Vec<u8> = (0..3000u32).map(|index| index as u8).collect();

    network.client_link.drop_next(1);
    let now = network.now();
    network.client.send_message(key, &data, true, now);

    let delivered = network.run_until(
        Duration::from_secs(30),
        Duration::from_millis(100),
        |network| !network.server.messages().is_empty(),
    );
    assert!(delivered);
    assert_eq!(network.server.message_data(), vec![data]);
}
