pub mod recording_handler;
pub mod test_network;

pub use recording_handler::RecordingHandler;
pub use test_network::TestNetwork;
pub use test_peer::TestPeer;

/// Routes `log` output through the test harness. Safe to call from every
/// test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
