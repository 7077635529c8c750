/// Integration tests for keep-alive and inactivity detection
/// These tests verify that silent peers are failed and cleaned up, and that
/// idle but healthy peers are kept alive by pings

use std::time::Duration;

use wicket_test::{init_logging, TestNetwork};
use wicket_transport::{ChannelKey, ChannelState, ChannelTraits, NetworkConfig};

const STEP: Duration = Duration::from_millis(250);

/// Sends one message so that the server creates an anonymous channel, and
/// returns the server's key for it
fn connect(network: &mut TestNetwork, client_key: ChannelKey) -> ChannelKey {
    let now = network.now();
    network.client.send_message(client_key, b"hello", true, now);
    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        !network.server.messages().is_empty()
    }));
    let created = network.server.created_channels();
    assert_eq!(created.len(), 1);
    created[0]
}

#[test]
fn silent_anonymous_channel_fails_and_is_destroyed() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    let server_key = connect(&mut network, client_key);
    assert!(network.server.interface.keep_alive().contains(server_key));

    network.client_link.set_down(true);
    let destroyed = network.run_until(Duration::from_secs(90), STEP, |network| {
        network.server.has_destroyed(server_key)
    });
    assert!(destroyed);
    assert!(network.server.has_failed(server_key));
    assert!(network.server.interface.keep_alive().num_pings_sent() > 0);
    assert_eq!(
        network.server.interface.channel_state(server_key),
        ChannelState::Destroyed
    );
    assert_eq!(network.server.interface.num_channels(), 0);
}

#[test]
fn pings_keep_a_quiet_channel_alive() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    let server_key = connect(&mut network, client_key);

    network.run_for(Duration::from_secs(120), STEP);

    assert!(!network.server.has_failed(server_key));
    assert_eq!(
        network.server.interface.channel_state(server_key),
        ChannelState::Anonymous
    );
    assert!(network.server.interface.keep_alive().num_pings_sent() > 0);
    // Pings carry no messages
    assert_eq!(network.client.messages().len(), 0);
}

#[test]
fn claimed_channel_is_no_longer_kept_alive() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    let server_key = connect(&mut network, client_key);

    let claimed = network.server_channel(ChannelTraits::Internal, false);
    assert_eq!(claimed, server_key);
    assert_eq!(
        network.server.interface.channel_state(server_key),
        ChannelState::Established
    );
    assert!(!network.server.interface.keep_alive().contains(server_key));
}

#[test]
fn silence_is_reported_as_inactivity() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    let server_key = connect(&mut network, client_key);

    let now = network.now();
    network.server.interface.start_inactivity_detection(
        server_key,
        Duration::from_secs(3),
        Duration::from_secs(1),
        now,
    );
    network.client_link.set_down(true);

    let inactive = network.run_until(Duration::from_secs(10), STEP, |network| {
        network.server.has_gone_inactive(server_key)
    });
    assert!(inactive);
    // Inactivity is only reported, the channel stays
    assert!(!network.server.has_failed(server_key));
    assert!(network.server.interface.channel(server_key).is_some());
}

#[test]
fn short_silence_sends_exactly_one_ping() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);
    let server_key = connect(&mut network, client_key);
    network.client_link.set_down(true);

    network.run_for(Duration::from_secs(5), STEP);

    assert_eq!(network.server.interface.keep_alive().num_pings_sent(), 1);
    assert!(!network.server.has_failed(server_key));
}
