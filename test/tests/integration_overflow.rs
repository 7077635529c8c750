/// Integration tests for send window overflow
/// These tests verify that packets beyond a full send window are held back
/// and released in order as the peer's acks open the window

use std::time::Duration;

use wicket_test::{init_logging, TestNetwork};
use wicket_transport::{ChannelTraits, NetworkConfig, EXTERNAL_WINDOW_SIZE};

fn external_config() -> NetworkConfig {
    NetworkConfig {
        is_external: true,
        ..NetworkConfig::default()
    }
}

#[test]
fn full_window_queues_overflow_packets() {
    init_logging();
    let mut network = TestNetwork::new(external_config());
    let client_key = network.client_channel(ChannelTraits::External, false);
    network.server_channel(ChannelTraits::External, false);
    network.client_link.set_down(true);

    let expected: Vec<Vec<u8>> = (0..300u32).map(|index| index.to_be_bytes().to_vec()).collect();
    let now = network.now();
    for data in &expected {
        network.client.send_message(client_key, data, true, now);
    }

    let channel = network.client.interface.channel(client_key).unwrap();
    assert_eq!(channel.window_size(), EXTERNAL_WINDOW_SIZE);
    assert_eq!(channel.num_overflow_packets(), 300 - EXTERNAL_WINDOW_SIZE);
    assert_eq!(channel.num_unacked_packets(), 300);

    network.client_link.set_down(false);
    let delivered = network.run_until(
        Duration::from_secs(120),
        Duration::from_millis(50),
        |network| network.server.messages().len() >= expected.len(),
    );
    assert!(delivered, "only {} messages arrived", network.server.messages().len());
    assert_eq!(network.server.message_data(), expected);

    let drained = network.run_until(Duration::from_secs(30), Duration::from_millis(50), |network| {
        !network.client.interface.has_unacked_packets()
    });
    assert!(drained);
    let channel = network.client.interface.channel(client_key).unwrap();
    assert_eq!(channel.num_overflow_packets(), 0);
}

#[test]
fn external_interface_refuses_channel_creation() {
    init_logging();
    let mut network = TestNetwork::with_configs(NetworkConfig::default(), external_config());
    let key = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    network.client.send_message(key, b"let me in", true, now);
    network.run_for(Duration::from_secs(2), Duration::from_millis(50));

    assert!(network.server.messages().is_empty());
    assert!(network.server.created_channels().is_empty());
    assert_eq!(network.server.interface.num_channels(), 0);
    assert!(network.server.interface.receiving_stats().num_corrupted_packets > 0);
}
