#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trailsync::{
    ClientController, Command, ControllerEvent, EntityId, Frame, MemoryNetwork, MemoryTransport,
    Message, Packet, PlayerId, SERVER_PLAYER, ServerController, Steppable, SyncConfig, Transport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub id: EntityId,
    pub owner: PlayerId,
    pub total: i64,
    pub step: i64,
}

impl Tally {
    pub fn new(owner: PlayerId) -> Self {
        Self {
            id: 0,
            owner,
            total: 0,
            step: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TallyCommand {
    Add(i64),
    SetStep(i64),
}

impl Steppable for Tally {
    type Command = TallyCommand;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn step(&mut self, _frame: Frame) {
        self.total = self.total.wrapping_add(self.step);
    }

    fn apply_command(&mut self, command: &Command<TallyCommand>) {
        if command.player != self.owner && command.player != SERVER_PLAYER {
            return;
        }
        match command.payload {
            TallyCommand::Add(amount) => self.total = self.total.wrapping_add(amount),
            TallyCommand::SetStep(step) => self.step = step,
        }
    }
}

pub type TestServer = ServerController<Tally, MemoryTransport>;
pub type TestClient = ClientController<Tally, MemoryTransport>;

pub fn test_config() -> SyncConfig {
    SyncConfig {
        hash_check_interval_ms: 500,
        snapshot_cooldown_ms: 500,
        ..SyncConfig::default()
    }
}

/// Trailing hashes seen after each update, keyed by trailing frame.
#[derive(Debug, Default)]
pub struct HashLog {
    hashes: BTreeMap<Frame, u64>,
}

impl HashLog {
    pub fn record(&mut self, frame: Frame, hash: u64) {
        self.hashes.insert(frame, hash);
    }

    /// Frames both logs saw, with whether the hashes agree.
    pub fn compare(&self, other: &HashLog) -> Vec<(Frame, bool)> {
        self.hashes
            .iter()
            .filter_map(|(frame, hash)| other.hashes.get(frame).map(|h| (*frame, h == hash)))
            .collect()
    }
}

/// A server and its clients on one in-memory network, all driven at the configured tick rate.
pub struct Session {
    pub network: MemoryNetwork,
    pub server: TestServer,
    pub clients: Vec<TestClient>,
    pub server_events: Vec<ControllerEvent>,
    pub client_events: Vec<Vec<ControllerEvent>>,
    pub server_hashes: HashLog,
    pub client_hashes: Vec<HashLog>,
    pub dt: Duration,
}

impl Session {
    pub fn new(config: SyncConfig) -> Self {
        let network = MemoryNetwork::new();
        let dt = config.frame_duration();
        let server = ServerController::new(config, network.endpoint()).unwrap();

        Self {
            network,
            server,
            clients: Vec::new(),
            server_events: Vec::new(),
            client_events: Vec::new(),
            server_hashes: HashLog::default(),
            client_hashes: Vec::new(),
            dt,
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server.transport().local_addr()
    }

    /// Adds a client and starts its join handshake. Returns its index.
    pub fn add_client(&mut self, name: &str) -> usize {
        let config = self.server.config().clone();
        let mut client =
            ClientController::new(config, self.network.endpoint(), self.server_addr(), name)
                .unwrap();
        client.connect().unwrap();

        self.clients.push(client);
        self.client_events.push(Vec::new());
        self.client_hashes.push(HashLog::default());
        self.clients.len() - 1
    }

    /// One frame for everybody. The server spawns a tally for each joining player.
    pub fn tick(&mut self) {
        self.server.update(self.dt).unwrap();

        let events: Vec<ControllerEvent> = self.server.drain_events().collect();
        for event in &events {
            if let ControllerEvent::PlayerJoined { player, .. } = event {
                self.server.add_steppable(Tally::new(*player)).unwrap();
            }
        }
        self.server_events.extend(events);

        let tss = self.server.tss();
        self.server_hashes
            .record(tss.trailing_frame(), tss.trailing_hash());

        for (index, client) in self.clients.iter_mut().enumerate() {
            client.update(self.dt).unwrap();
            self.client_events[index].extend(client.drain_events());

            if !client.is_waiting_for_synchronization() {
                let tss = client.tss();
                self.client_hashes[index].record(tss.trailing_frame(), tss.trailing_hash());
            }
        }
    }

    pub fn run(&mut self, frames: u32) {
        for _ in 0..frames {
            self.tick();
        }
    }

    /// Runs until every client is connected and synchronized, or panics.
    pub fn settle(&mut self) {
        for _ in 0..600 {
            self.tick();
            let ready = self.clients.iter().all(|c| {
                c.connection_state() == trailsync::ConnectionState::Connected
                    && !c.is_waiting_for_synchronization()
            });
            if ready {
                return;
            }
        }
        panic!("clients did not synchronize");
    }

    pub fn client_events(&self, index: usize) -> &[ControllerEvent] {
        &self.client_events[index]
    }

    /// Asserts that the client's trailing hashes agree with the server's on every shared frame.
    pub fn assert_consistent(&self, index: usize) {
        self.assert_consistent_since(index, 0);
    }

    pub fn assert_consistent_since(&self, index: usize, from: Frame) {
        let shared: Vec<(Frame, bool)> = self.client_hashes[index]
            .compare(&self.server_hashes)
            .into_iter()
            .filter(|(frame, _)| *frame >= from)
            .collect();
        assert!(!shared.is_empty(), "no shared frames for client {}", index);
        let diverged: Vec<Frame> = shared
            .iter()
            .filter(|(_, same)| !same)
            .map(|(frame, _)| *frame)
            .collect();
        assert!(
            diverged.is_empty(),
            "client {} diverged at frames {:?}",
            index,
            diverged
        );
    }
}

/// Decodes every datagram waiting on a raw endpoint.
pub fn receive_messages(endpoint: &mut MemoryTransport) -> Vec<(Message, SocketAddr)> {
    endpoint
        .receive()
        .unwrap()
        .into_iter()
        .map(|(data, addr)| (Packet::deserialize(&data).unwrap().message, addr))
        .collect()
}

pub fn send_message(endpoint: &mut MemoryTransport, to: SocketAddr, message: Message) {
    let data = Packet::new(message).serialize().unwrap();
    endpoint.send(&data, Some(to)).unwrap();
    endpoint.flush().unwrap();
}
