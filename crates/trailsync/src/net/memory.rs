use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use super::stats::NetworkStats;
use super::transport::Transport;

const FIRST_PORT: u16 = 40000;

#[derive(Debug, Default)]
struct NetworkInner {
    inboxes: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    blocked: HashSet<SocketAddr>,
    next_port: u16,
    delivered: u64,
}

/// In-process datagram network for single-threaded sessions and tests.
///
/// Endpoints created from the same network exchange datagrams on `flush`. Delivery is in order
/// and lossless unless an endpoint is blocked.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> MemoryTransport {
        let addr = {
            let mut inner = self.inner.borrow_mut();
            let port = FIRST_PORT.wrapping_add(inner.next_port);
            inner.next_port = inner.next_port.wrapping_add(1);
            SocketAddr::from((Ipv4Addr::LOCALHOST, port))
        };
        self.endpoint_at(addr)
    }

    pub fn endpoint_at(&self, addr: SocketAddr) -> MemoryTransport {
        self.inner.borrow_mut().inboxes.entry(addr).or_default();
        MemoryTransport {
            network: self.clone(),
            local_addr: addr,
            remote_addr: None,
            outgoing: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Silently drops every datagram sent to or from `addr` while set.
    pub fn set_blocked(&self, addr: SocketAddr, blocked: bool) {
        let mut inner = self.inner.borrow_mut();
        if blocked {
            inner.blocked.insert(addr);
        } else {
            inner.blocked.remove(&addr);
        }
    }

    /// Datagrams waiting in inboxes.
    pub fn in_flight(&self) -> usize {
        self.inner.borrow().inboxes.values().map(VecDeque::len).sum()
    }

    pub fn delivered(&self) -> u64 {
        self.inner.borrow().delivered
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: Vec<u8>) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.blocked.contains(&from) || inner.blocked.contains(&to) {
            return false;
        }
        let Some(inbox) = inner.inboxes.get_mut(&to) else {
            return false;
        };
        inbox.push_back((data, from));
        inner.delivered += 1;
        true
    }

    fn take_inbox(&self, addr: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        self.inner
            .borrow_mut()
            .inboxes
            .get_mut(&addr)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    outgoing: Vec<(Vec<u8>, SocketAddr)>,
    stats: NetworkStats,
}

impl MemoryTransport {
    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn with_remote(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, data: &[u8], recipient: Option<SocketAddr>) -> io::Result<()> {
        let addr = recipient
            .or(self.remote_addr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.outgoing.push((data.to_vec(), addr));
        Ok(())
    }

    fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let datagrams = self.network.take_inbox(self.local_addr);
        for (data, _) in &datagrams {
            self.stats.record_received(data.len());
        }
        Ok(datagrams)
    }

    fn flush(&mut self) -> io::Result<()> {
        for (data, addr) in std::mem::take(&mut self.outgoing) {
            let size = data.len();
            if self.network.deliver(self.local_addr, addr, data) {
                self.stats.record_sent(size);
            } else {
                self.stats.packets_dropped += 1;
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

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.inner.borrow_mut().inboxes.remove(&self.local_addr);
    }
}
