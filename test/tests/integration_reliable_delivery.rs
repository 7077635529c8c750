/// Integration tests for reliable delivery between two interfaces
/// These tests verify that reliable messages survive loss and reordering,
/// arrive once and in order, and that unreliable ones are never repaired

use std::time::Duration;

use wicket_test::{init_logging, LocalSocketPair, RecordingHandler, TestNetwork};
use wicket_transport::{Bundle, ChannelTraits, NetworkConfig, Reason};

const STEP: Duration = Duration::from_millis(50);

fn numbered(count: u32) -> Vec<Vec<u8>> {
    (0..count)
        .map(|index| format!("message {}", index).into_bytes())
        .collect()
}

#[test]
fn reliable_messages_arrive_in_order_despite_loss() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    network.client_link.drop_every(Some(3));

    let expected = numbered(40);
    for data in &expected {
        let now = network.now();
        network.client.send_message(key, data, true, now);
        network.step(Duration::from_millis(10));
    }

    let delivered = network.run_until(Duration::from_secs(60), STEP, |network| {
        network.server.messages().len() >= expected.len()
    });
    assert!(delivered, "only {} messages arrived", network.server.messages().len());
    assert_eq!(network.server.message_data(), expected);

    // The first packet created exactly one anonymous channel
    assert_eq!(network.server.created_channels().len(), 1);
    assert!(network.client_link.num_dropped() > 0);
    assert!(network.client.interface.sending_stats().num_packets_resent > 0);

    let drained = network.run_until(Duration::from_secs(30), STEP, |network| {
        !network.client.interface.has_unacked_packets()
    });
    assert!(drained, "client still waits for acks");
}

#[test]
fn large_message_is_fragmented_and_reassembled() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    let data: Vec<u8> = (0..5000u32).map(|index| (index % 251) as u8).collect();

    // Lose the first fragment, which is also the one creating the channel
    network.client_link.drop_next(1);
    let now = network.now();
    network.client.send_message(key, &data, true, now);

    let delivered = network.run_until(Duration::from_secs(30), STEP, |network| {
        !network.server.messages().is_empty()
    });
    assert!(delivered);
    assert_eq!(network.server.message_data(), vec![data]);
}

#[test]
fn unreliable_loss_is_not_repaired() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);

    let now = network.now();
    network.client.send_message(key, b"hello", true, now);
    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        network.server.messages().len() == 1
    }));

    network.client_link.drop_next(1);
    let now = network.now();
    network.client.send_message(key, b"lost", false, now);
    network.client.send_message(key, b"kept", false, now);
    network.run_for(Duration::from_secs(5), STEP);

    assert_eq!(
        network.server.message_data(),
        vec![b"hello".to_vec(), b"kept".to_vec()]
    );
}

#[test]
fn request_receives_reply() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    let handler = RecordingHandler::new();

    let now = network.now();
    network
        .client
        .interface
        .bundle_mut(key)
        .unwrap()
        .start_request(b"ping", Box::new(handler.clone()), Some(Duration::from_secs(10)))
        .unwrap();
    network.client.interface.send(key, now).unwrap();
    assert_eq!(network.client.interface.num_outstanding_requests(), 1);

    assert!(network.run_until(Duration::from_secs(5), STEP, |network| {
        !network.server.messages().is_empty()
    }));
    let request = network.server.messages()[0].clone();
    assert_eq!(request.data, b"ping");
    let reply_id = request.reply_id.expect("request carries a reply id");
    let server_key = request.channel.expect("request arrived on a channel");

    let now = network.now();
    network
        .server
        .interface
        .bundle_mut(server_key)
        .unwrap()
        .add_reply(reply_id, b"pong", true)
        .unwrap();
    network.server.interface.send(server_key, now).unwrap();

    assert!(network.run_until(Duration::from_secs(5), STEP, |_| {
        !handler.outcomes().is_empty()
    }));
    assert_eq!(handler.outcomes(), vec![Ok(b"pong".to_vec())]);
    assert_eq!(network.client.interface.num_outstanding_requests(), 0);
}

#[test]
fn unanswered_request_times_out() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());
    let key = network.client_channel(ChannelTraits::Internal, false);
    let handler = RecordingHandler::new();
    network.client_link.set_down(true);

    let now = network.now();
    network
        .client
        .interface
        .bundle_mut(key)
        .unwrap()
        .start_request(b"anyone?", Box::new(handler.clone()), Some(Duration::from_secs(2)))
        .unwrap();
    network.client.interface.send(key, now).unwrap();
    network.run_for(Duration::from_secs(3), STEP);

    assert_eq!(handler.outcomes(), vec![Err(Reason::TimerExpired)]);
    assert_eq!(network.client.interface.num_outstanding_requests(), 0);
}

#[test]
fn once_off_reliable_packet_is_delivered_once() {
    init_logging();
    let mut network = TestNetwork::new(NetworkConfig::default());

    // The first ack is lost, so the packet is resent and must be deduplicated
    network.server_link.drop_next(1);
    let mut bundle = Bundle::new();
    bundle.add_message(b"once", true).unwrap();
    let now = network.now();
    network
        .client
        .interface
        .send_off_channel(LocalSocketPair::server_addr(), &mut bundle, now)
        .unwrap();
    assert_eq!(network.client.interface.num_once_off_packets(), 1);

    let acked = network.run_until(Duration::from_secs(10), STEP, |network| {
        network.client.interface.num_once_off_packets() == 0
    });
    assert!(acked);

    let messages = network.server.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel, None);
    assert_eq!(messages[0].data, b"once");
    assert_eq!(network.server.interface.receiving_stats().num_duplicate_packets, 1);
    assert!(network.server.created_channels().is_empty());
}

#[test]
fn once_off_history_is_forgotten_after_the_resend_window() {
    init_logging();
    let config = NetworkConfig::default();
    let window = config.once_off.receive_window();
    let mut network = TestNetwork::new(config);

    let mut bundle = Bundle::new();
    bundle.add_message(b"once", true).unwrap();
    let now = network.now();
    network
        .client
        .interface
        .send_off_channel(LocalSocketPair::server_addr(), &mut bundle, now)
        .unwrap();
    network.step(STEP);
    assert_eq!(network.server.interface.packet_receiver().num_once_off_peers(), 1);

    // Eviction runs once per window, so state may outlive it by one period
    let forgotten = network.run_until(window * 3, Duration::from_secs(1), |network| {
        network.server.interface.packet_receiver().num_once_off_peers() == 0
    });
    assert!(forgotten);
    assert_eq!(network.server.message_data(), vec![b"once".to_vec()]);
}
