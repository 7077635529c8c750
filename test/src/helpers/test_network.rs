use std::time::{Duration, Instant};

use wicket_transport::{ChannelKey, ChannelTraits, NetworkConfig};

use crate::{LinkControl, LocalSocketPair, TestPeer};

/// A client and a server joined by in-memory sockets and driven by a
/// manual clock
pub struct TestNetwork {
    pub client: TestPeer,
    pub server: TestPeer,
    pub client_link: LinkControl,
    pub server_link: LinkControl,
    now: Instant,
}

impl TestNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_configs(config.clone(), config)
    }

    pub fn with_configs(client_config: NetworkConfig, server_config: NetworkConfig) -> Self {
        let LocalSocketPair {
            client,
            server,
            client_link,
            server_link,
        } = LocalSocketPair::new();

        Self {
            client: TestPeer::new(
                Box::new(client),
                LocalSocketPair::client_addr(),
                client_config,
            ),
            server: TestPeer::new(
                Box::new(server),
                LocalSocketPair::server_addr(),
                server_config,
            ),
            client_link,
            server_link,
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Opens a client channel to the server. `is_regular` applies to both
    /// ends of the link.
    pub fn client_channel(&mut self, traits: ChannelTraits, is_regular: bool) -> ChannelKey {
        let now = self.now;
        let server_addr = self.server.addr;
        let key = self
            .client
            .interface
            .find_or_create_channel(server_addr, traits, now);
        self.client
            .interface
            .set_is_local_regular(key, is_regular, now);
        self.client
            .interface
            .set_is_remote_regular(key, is_regular, now);
        key
    }

    /// Opens a server channel to the client
    pub fn server_channel(&mut self, traits: ChannelTraits, is_regular: bool) -> ChannelKey {
        let now = self.now;
        let client_addr = self.client.addr;
        let key = self
            .server
            .interface
            .find_or_create_channel(client_addr, traits, now);
        self.server
            .interface
            .set_is_local_regular(key, is_regular, now);
        self.server
            .interface
            .set_is_remote_regular(key, is_regular, now);
        key
    }

    /// Advances the clock and lets both peers process
    pub fn step(&mut self, elapsed: Duration) {
        self.now += elapsed;
        self.client.process(self.now);
        self.server.process(self.now);
    }

    pub fn run_for(&mut self, duration: Duration, step: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.step(step);
        }
    }

    /// Steps until `is_done` holds or `timeout` passes. Returns whether it
    /// held.
    pub fn run_until<F>(&mut self, timeout: Duration, step: Duration, mut is_done: F) -> bool
    where
        F: FnMut(&TestNetwork) -> bool,
    {
        let end = self.now + timeout;
        while self.now < end {
            if is_done(self) {
                return true;
            }
            self.step(step);
        }
        is_done(self)
    }
}
