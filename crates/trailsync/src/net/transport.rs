use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::MAX_DATAGRAM_SIZE;
use super::stats::{NetworkStats, PacketLossSimulation};

/// Unreliable datagram transport used by the controllers.
///
/// `send` queues a datagram; `flush` hands queued datagrams to the network. A `recipient` of
/// `None` targets the transport's default remote peer.
pub trait Transport {
    fn send(&mut self, data: &[u8], recipient: Option<SocketAddr>) -> io::Result<()>;

    /// Returns every datagram that arrived since the last call without blocking.
    fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>>;

    fn flush(&mut self) -> io::Result<()>;

    fn local_addr(&self) -> SocketAddr;

    fn stats(&self) -> &NetworkStats;

    fn stats_mut(&mut self) -> &mut NetworkStats;
}

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    outgoing: Vec<(Vec<u8>, SocketAddr)>,
    stats: NetworkStats,
    loss_sim: PacketLossSimulation,
    recv_buffer: Box<[u8]>,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            outgoing: Vec::new(),
            stats: NetworkStats::default(),
            loss_sim: PacketLossSimulation::default(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice(),
        })
    }

    /// Binds an ephemeral local port and targets `remote` by default.
    pub fn connect<A: ToSocketAddrs>(remote: A) -> io::Result<Self> {
        let remote_addr = remote.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Could not resolve address")
        })?;
        let bind_addr: SocketAddr = if remote_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let mut transport = Self::bind(bind_addr)?;
        transport.remote_addr = Some(remote_addr);
        Ok(transport)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn set_loss_simulation(&mut self, sim: PacketLossSimulation) {
        self.loss_sim = sim;
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8], recipient: Option<SocketAddr>) -> io::Result<()> {
        let addr = recipient
            .or(self.remote_addr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;

        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds maximum size",
            ));
        }

        self.outgoing.push((data.to_vec(), addr));
        Ok(())
    }

    fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    self.stats.record_received(size);
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Windows reports ICMP port unreachable on the next receive.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut queued = std::mem::take(&mut self.outgoing).into_iter();

        while let Some((data, addr)) = queued.next() {
            if self.loss_sim.should_drop() {
                self.stats.packets_dropped += 1;
                continue;
            }

            match self.socket.send_to(&data, addr) {
                Ok(bytes) => self.stats.record_sent(bytes),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.outgoing.push((data, addr));
                    self.outgoing.extend(queued.by_ref());
                    break;
                }
                Err(e) => {
                    self.outgoing.extend(queued.by_ref());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }
}
