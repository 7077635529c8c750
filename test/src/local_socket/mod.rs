/// In-memory socket implementation for E2E testing
/// Routes datagrams between two interfaces without network I/O, with
/// scriptable packet loss

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use wicket_transport::PacketSocket;

pub const CLIENT_ADDR: &str = "127.0.0.1:12345";
pub const SERVER_ADDR: &str = "127.0.0.1:54321";

type Queue = Arc<Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>;

#[derive(Default)]
struct LinkState {
    is_down: bool,
    drop_next: usize,
    drop_every: Option<usize>,
    num_sent: usize,
    num_dropped: usize,
}

/// Controls the loss on one direction of a `LocalSocketPair`
#[derive(Clone, Default)]
pub struct LinkControl {
    state: Arc<Mutex<LinkState>>,
}

impl LinkControl {
    /// Drops everything while down
    pub fn set_down(&self, is_down: bool) {
        self.state.lock().unwrap().is_down = is_down;
    }

    /// Drops the next `count` datagrams
    pub fn drop_next(&self, count: usize) {
        self.state.lock().unwrap().drop_next = count;
    }

    /// Drops every `nth` datagram sent
    pub fn drop_every(&self, nth: Option<usize>) {
        self.state.lock().unwrap().drop_every = nth;
    }

    pub fn num_sent(&self) -> usize {
        self.state.lock().unwrap().num_sent
    }

    pub fn num_dropped(&self) -> usize {
        self.state.lock().unwrap().num_dropped
    }

    fn should_drop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.num_sent += 1;

        let should_drop = if state.is_down {
            true
        } else if state.drop_next > 0 {
            state.drop_next -= 1;
            true
        } else {
            match state.drop_every {
                Some(nth) if nth > 0 => state.num_sent % nth == 0,
                _ => false,
            }
        };

        if should_drop {
            state.num_dropped += 1;
        }
        should_drop
    }
}

/// One end of a `LocalSocketPair`
pub struct LocalSocket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    outgoing: Queue,
    incoming: Queue,
    link: LinkControl,
}

impl PacketSocket for LocalSocket {
    fn send_to(&mut self, data: &[u8], addr: &SocketAddr) -> io::Result<usize> {
        // Datagrams to anyone else vanish, as they would on a real network
        if *addr == self.peer_addr && !self.link.should_drop() {
            self.outgoing
                .lock()
                .unwrap()
                .push_back((self.local_addr, data.to_vec()));
        }
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((src, data)) = self.incoming.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        let length = data.len().min(buf.len());
        buf[..length].copy_from_slice(&data[..length]);
        Ok(Some((length, src)))
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.incoming.lock().unwrap().is_empty())
    }

    fn send_to_within(
        &mut self,
        data: &[u8],
        addr: &SocketAddr,
        _timeout: Duration,
    ) -> io::Result<usize> {
        self.send_to(data, addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Pair of connected client and server sockets for E2E testing
pub struct LocalSocketPair {
    pub client: LocalSocket,
    pub server: LocalSocket,
    /// Loss on datagrams sent by the client
    pub client_link: LinkControl,
    /// Loss on datagrams sent by the server
    pub server_link: LinkControl,
}

impl LocalSocketPair {
    pub fn new() -> Self {
        let client_addr = Self::client_addr();
        let server_addr = Self::server_addr();

        let client_to_server: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let server_to_client: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let client_link = LinkControl::default();
        let server_link = LinkControl::default();

        let client = LocalSocket {
            local_addr: client_addr,
            peer_addr: server_addr,
            outgoing: client_to_server.clone(),
            incoming: server_to_client.clone(),
            link: client_link.clone(),
        };
        let server = LocalSocket {
            local_addr: server_addr,
            peer_addr: client_addr,
            outgoing: server_to_client,
            incoming: client_to_server,
            link: server_link.clone(),
        };

        Self {
            client,
            server,
            client_link,
            server_link,
        }
    }

    pub fn client_addr() -> SocketAddr {
        CLIENT_ADDR.parse().unwrap()
    }

    pub fn server_addr() -> SocketAddr {
        SERVER_ADDR.parse().unwrap()
    }
}

impl Default for LocalSocketPair {
    fn default() -> Self {
        Self::new()
    }
}
