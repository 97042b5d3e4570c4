use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("server full ({0} players)")]
    Full(usize),
}

/// A joined remote peer. Times are positions on the owning controller's session clock.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    pub player: PlayerId,
    pub name: String,
    pub joined_at: Duration,
    pub last_receive: Duration,
    pub last_snapshot_sent: Option<Duration>,
}

impl Peer {
    pub fn is_timed_out(&self, now: Duration, timeout: Duration) -> bool {
        now.saturating_sub(self.last_receive) > timeout
    }

    /// Whether a snapshot may be sent at `now` given the per-peer cooldown.
    pub fn snapshot_allowed(&self, now: Duration, cooldown: Duration) -> bool {
        match self.last_snapshot_sent {
            Some(sent) => now.saturating_sub(sent) >= cooldown,
            None => true,
        }
    }
}

/// Maps peer addresses to player numbers. Numbers start at 1 and are never reused.
#[derive(Debug)]
pub struct PlayerRegistry {
    players_by_addr: HashMap<SocketAddr, PlayerId>,
    peers: HashMap<PlayerId, Peer>,
    next_player: PlayerId,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players_by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_player: 1,
            max_players,
        }
    }

    /// Registers `addr`, or returns the existing entry if it already joined.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        name: &str,
        now: Duration,
    ) -> Result<&mut Peer, RegistryError> {
        if let Some(&player) = self.players_by_addr.get(&addr) {
            return self.peers.get_mut(&player).ok_or(RegistryError::Full(0));
        }

        if self.peers.len() >= self.max_players {
            return Err(RegistryError::Full(self.max_players));
        }

        let player = self.next_player;
        self.next_player += 1;

        self.players_by_addr.insert(addr, player);
        let peer = self.peers.entry(player).or_insert(Peer {
            addr,
            player,
            name: name.to_owned(),
            joined_at: now,
            last_receive: now,
            last_snapshot_sent: None,
        });
        Ok(peer)
    }

    pub fn player_of(&self, addr: &SocketAddr) -> Option<PlayerId> {
        self.players_by_addr.get(addr).copied()
    }

    pub fn get(&self, player: PlayerId) -> Option<&Peer> {
        self.peers.get(&player)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Peer> {
        let player = self.players_by_addr.get(addr)?;
        self.peers.get_mut(player)
    }

    pub fn touch(&mut self, addr: &SocketAddr, now: Duration) {
        if let Some(peer) = self.get_by_addr_mut(addr) {
            peer.last_receive = now;
        }
    }

    pub fn remove(&mut self, player: PlayerId) -> Option<Peer> {
        let peer = self.peers.remove(&player)?;
        self.players_by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Peer> {
        let player = self.players_by_addr.remove(addr)?;
        self.peers.remove(&player)
    }

    /// Removes and returns every peer silent for longer than `timeout`.
    pub fn cleanup_timed_out(&mut self, now: Duration, timeout: Duration) -> Vec<Peer> {
        let mut timed_out: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(now, timeout))
            .map(|peer| peer.player)
            .collect();
        timed_out.sort_unstable();

        timed_out
            .into_iter()
            .filter_map(|player| self.remove(player))
            .collect()
    }

    /// Peers ordered by player number.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_unstable_by_key(|peer| peer.player);
        peers.into_iter()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.iter().map(|peer| peer.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}
