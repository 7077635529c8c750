/// Integration tests over real loopback UDP sockets
/// These tests verify the blocking event loop against the operating
/// system's sockets rather than the in-memory link

use std::time::{Duration, Instant};

use wicket_test::init_logging;
use wicket_transport::{ChannelTraits, InterfaceEvent, NetworkConfig, NetworkInterface};

#[test]
fn message_crosses_loopback_and_is_acked() {
    init_logging();
    let mut client = NetworkInterface::bind("127.0.0.1:0", NetworkConfig::default()).unwrap();
    let mut server = NetworkInterface::bind("127.0.0.1:0", NetworkConfig::default()).unwrap();
    let server_addr = server.local_addr().unwrap();

    let now = Instant::now();
    let key = client.find_or_create_channel(server_addr, ChannelTraits::Internal, now);
    client.set_is_local_regular(key, false, now);
    client.bundle_mut(key).unwrap().add_message(b"over the wire", true).unwrap();
    client.send(key, now).unwrap();
    assert!(client.has_unacked_packets());

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    while received.is_empty() && Instant::now() < deadline {
        server.process_once(Duration::from_millis(20)).unwrap();
        client.process_once(Duration::from_millis(1)).unwrap();
        received.extend(server.take_events().into_iter().filter_map(|event| match event {
            InterfaceEvent::Message(message) => Some(message.data),
            _ => None,
        }));
    }
    assert_eq!(received, vec![b"over the wire".to_vec()]);

    assert!(client.process_until_channels_empty(Duration::from_secs(5)).unwrap());
    assert!(client.sending_stats().num_reliable_packets_sent >= 1);
}
