use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use crate::constants::PACKET_MAX_SIZE;

/// A datagram socket an interface sends and receives through
pub trait PacketSocket {
    /// Sends one datagram
    fn send_to(&mut self, data: &[u8], addr: &SocketAddr) -> io::Result<usize>;
    /// Receives one datagram if one is pending, without blocking
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
    /// Waits up to `timeout` for a datagram. Returns whether one is pending.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;
    /// Sends one datagram, blocking up to `timeout` for room in the send
    /// buffer. Used to retry after a full transmit queue.
    fn send_to_within(
        &mut self,
        data: &[u8],
        addr: &SocketAddr,
        timeout: Duration,
    ) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A non-blocking `std` UDP socket
pub struct UdpPacketSocket {
    socket: UdpSocket,
}

impl UdpPacketSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl PacketSocket for UdpPacketSocket {
    fn send_to(&mut self, data: &[u8], addr: &SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut peek_buf = [0u8; PACKET_MAX_SIZE];
        if timeout.is_zero() {
            return match self.socket.peek_from(&mut peek_buf) {
                Ok(_) => Ok(true),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
                Err(error) => Err(error),
            };
        }

        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(Some(timeout))?;
        let result = match self.socket.peek_from(&mut peek_buf) {
            Ok(_) => Ok(true),
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(error) => Err(error),
        };
        self.socket.set_nonblocking(true)?;
        result
    }

    fn send_to_within(
        &mut self,
        data: &[u8],
        addr: &SocketAddr,
        timeout: Duration,
    ) -> io::Result<usize> {
        if timeout.is_zero() {
            return self.socket.send_to(data, addr);
        }

        // A blocking send returns as soon as the buffer has room
        self.socket.set_nonblocking(false)?;
        self.socket.set_write_timeout(Some(timeout))?;
        let result = match self.socket.send_to(data, addr) {
            Err(error) if error.kind() == io::ErrorKind::TimedOut => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            result => result,
        };
        self.socket.set_nonblocking(true)?;
        result
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
