/// Integration tests for condemned channels and shutdown
/// These tests verify that condemned channels drain their outstanding
/// packets before going away, and give up once the peer stays silent

use std::time::Duration;

use wicket_test::{init_logging, TestNetwork};
use wicket_transport::{ChannelState, ChannelTraits, CondemnedConfig, NetworkConfig};

const STEP: Duration = Duration::from_millis(50);

#[test]
fn condemned_channel_delivers_before_it_is_destroyed() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    network.client_link.drop_next(3);

    let expected: Vec<Vec<u8>> = (0..10u8).map(|index| vec![index; 8]).collect();
    let now = network.now();
    for data in &expected {
        network.client.send_message(key, data, true, now);
    }

    assert!(network.client.interface.condemn_channel(key, now));
    network.client.collect_events();
    assert_eq!(network.client.interface.channel_state(key), ChannelState::Condemned);
    assert!(network.client.interface.condemned().contains(key));
    assert!(!network.client.has_destroyed(key));

    let destroyed = network.run_until(Duration::from_secs(30), STEP, |network| {
        network.client.has_destroyed(key)
    });
    assert!(destroyed);
    assert_eq!(network.server.message_data(), expected);
    assert_eq!(network.client.interface.channel_state(key), ChannelState::Destroyed);
    assert!(network.client.interface.condemned().is_empty());
}

#[test]
fn condemned_regular_channel_resends_on_its_own() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, true);
    network.client_link.set_down(true);

    let now = network.now();
    network.client.send_message(key, b"last words", true, now);
    assert!(network.client.interface.condemn_channel(key, now));
    let channel = network.client.interface.channel(key).unwrap();
    assert!(!channel.is_local_regular());
    assert!(!channel.is_remote_regular());

    // Nothing newer will ever be acked, so only timed resends can deliver
    network.client_link.set_down(false);
    let destroyed = network.run_until(Duration::from_secs(10), STEP, |network| {
        network.client.has_destroyed(key)
    });
    assert!(destroyed);
    assert_eq!(network.server.message_data(), vec![b"last words".to_vec()]);
}

#[test]
fn condemned_channel_ages_out_when_peer_is_silent() {
    init_logging();
    let config = NetworkConfig {
        condemned: CondemnedConfig {
            age_limit: Duration::from_secs(5),
        },
        ..NetworkConfig::default()
    };
    let mut network = TestNetwork::new(config);
    let key = network.client_channel(ChannelTraits::Internal, false);
    network.client_link.set_down(true);

    let now = network.now();
    network.client.send_message(key, b"into the void", true, now);
    assert!(network.client.interface.condemn_channel(key, now));

    let destroyed = network.run_until(Duration::from_secs(20), STEP, |network| {
        network.client.has_destroyed(key)
    });
    assert!(destroyed);
    assert!(network.server.messages().is_empty());
}

#[test]
fn condemning_an_idle_channel_destroys_it_at_once() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    assert!(network.client.interface.condemn_channel(key, now));
    network.client.collect_events();
    assert!(network.client.has_destroyed(key));
    assert!(!network.client.interface.condemn_channel(key, now));
}

#[test]
fn anonymous_channel_can_be_deleted() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    network.client.send_message(client_key, b"hello", true, now);
    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        !network.server.created_channels().is_empty()
    }));
    let server_key = network.server.created_channels()[0];

    let client_addr = network.client.addr;
    let now = network.now();
    assert!(network.server.interface.del_anonymous(&client_addr, now));
    network.server.collect_events();
    assert!(network.server.has_destroyed(server_key));
    assert_eq!(network.server.interface.num_channels(), 0);

    // Nothing anonymous is left to delete
    assert!(!network.server.interface.del_anonymous(&client_addr, now));
}

#[test]
fn shutdown_destroys_only_owned_channels() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let client_key = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    network.client.send_message(client_key, b"hello", true, now);
    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        !network.server.created_channels().is_empty()
    }));
    let server_key = network.server.created_channels()[0];

    network.server.interface.shut_down();
    network.server.collect_events();
    assert!(network.server.has_destroyed(server_key));
    assert_eq!(network.server.interface.num_channels(), 0);

    network.client.interface.shut_down();
    network.client.collect_events();
    assert!(!network.client.has_destroyed(client_key));
    assert!(network.client.interface.channel(client_key).is_some());
}
