mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{Tally, TallyCommand, TestClient, receive_messages, send_message, test_config};
use trailsync::{
    ClientController, Command, ConnectionState, ControllerEvent, DisconnectReason, MemoryNetwork,
    MemoryTransport, Message, SyncConfig, Transport, Tss,
};

/// A client talking to a hand-driven server endpoint.
struct Harness {
    _network: MemoryNetwork,
    server: MemoryTransport,
    client: TestClient,
    client_addr: SocketAddr,
    config: SyncConfig,
}

impl Harness {
    fn new() -> Self {
        let network = MemoryNetwork::new();
        let server = network.endpoint();
        let transport = network.endpoint();
        let client_addr = transport.local_addr();
        let config = test_config();
        let client =
            ClientController::new(config.clone(), transport, server.local_addr(), "tester").unwrap();

        Self {
            _network: network,
            server,
            client,
            client_addr,
            config,
        }
    }

    fn to_client(&mut self, message: Message) {
        let addr = self.client_addr;
        send_message(&mut self.server, addr, message);
    }

    fn from_client(&mut self) -> Vec<Message> {
        receive_messages(&mut self.server)
            .into_iter()
            .map(|(message, _)| message)
            .collect()
    }

    fn update(&mut self, elapsed: Duration) -> u32 {
        self.client.update(elapsed).unwrap()
    }

    fn events(&mut self) -> Vec<ControllerEvent> {
        self.client.drain_events().collect()
    }

    /// Joins as player 1 and installs a snapshot whose leading copy is at `frame`.
    fn join_at(&mut self, frame: u64) {
        self.client.connect().unwrap();
        assert!(matches!(
            self.from_client().as_slice(),
            [Message::JoinRequest { .. }]
        ));

        self.to_client(Message::JoinAccepted { player: 1, frame });
        self.update(Duration::ZERO);
        assert_eq!(self.client.connection_state(), ConnectionState::Connected);
        assert!(self.client.is_waiting_for_synchronization());
        assert!(self.from_client().contains(&Message::GameStateRequest));

        let mut tss = Tss::<Tally>::new(&self.config.delay_frames()).unwrap();
        let spawn = tss.current_frame();
        tss.add_steppable(Tally::new(1), spawn).unwrap();
        tss.run_to_frame(frame);
        self.to_client(Message::GameStateResponse {
            snapshot: tss.packetize().unwrap(),
        });

        self.update(Duration::ZERO);
        assert!(!self.client.is_waiting_for_synchronization());
        assert_eq!(self.client.current_frame(), frame);
    }
}

#[test]
fn join_then_snapshot_synchronizes() {
    let mut harness = Harness::new();
    harness.join_at(600);

    let events = harness.events();
    assert!(events.contains(&ControllerEvent::Connected {
        player: 1,
        frame: 600
    }));
    assert!(events.contains(&ControllerEvent::Synchronized { frame: 600 }));
    assert_eq!(harness.client.tss().leading_state().entity_count(), 1);
}

#[test]
fn clock_sync_runs_forward_to_server_frame() {
    let mut harness = Harness::new();
    harness.join_at(1000);
    harness.events();

    let sync = harness.from_client();
    assert!(sync.contains(&Message::Synchronize {
        sent_frame: 1000,
        server_frame: None
    }));

    harness.to_client(Message::Synchronize {
        sent_frame: 1000,
        server_frame: Some(1010),
    });
    harness.update(Duration::ZERO);

    assert_eq!(harness.client.current_frame(), 1010);
    assert!(harness
        .events()
        .contains(&ControllerEvent::ClockAdjusted { delta: 10 }));
}

#[test]
fn clock_ahead_of_server_holds_stepping() {
    let mut harness = Harness::new();
    harness.join_at(1000);

    harness.to_client(Message::Synchronize {
        sent_frame: 1000,
        server_frame: Some(995),
    });
    harness.update(Duration::ZERO);
    assert!(harness
        .events()
        .contains(&ControllerEvent::ClockAdjusted { delta: -5 }));

    let dt = harness.config.frame_duration();
    let stepped: u32 = (0..5).map(|_| harness.update(dt)).sum();
    assert_eq!(stepped, 0);
    assert_eq!(harness.client.current_frame(), 1000);

    assert_eq!(harness.update(dt), 1);
    assert_eq!(harness.client.current_frame(), 1001);
}

#[test]
fn hash_mismatch_invalidates_once() {
    let mut harness = Harness::new();
    harness.join_at(500);
    let dt = harness.config.frame_duration();
    for _ in 0..5 {
        harness.update(dt);
    }
    harness.events();
    harness.from_client();

    let tss = harness.client.tss();
    let (frame, hash) = (tss.trailing_frame(), tss.trailing_hash());
    harness.to_client(Message::HashCheck {
        frame,
        hash: hash ^ 1,
    });
    harness.update(Duration::ZERO);

    harness.to_client(Message::HashCheck {
        frame,
        hash: hash ^ 2,
    });
    harness.update(Duration::ZERO);

    let events = harness.events();
    let invalidations = events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::Invalidated { .. }))
        .count();
    assert_eq!(invalidations, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::HashMismatch { frame: f, .. } if *f == frame)));

    let requests = harness
        .from_client()
        .into_iter()
        .filter(|m| *m == Message::GameStateRequest)
        .count();
    assert_eq!(requests, 1);
    assert!(harness.client.is_waiting_for_synchronization());
}

#[test]
fn matching_hash_check_is_silent() {
    let mut harness = Harness::new();
    harness.join_at(500);
    let dt = harness.config.frame_duration();
    for _ in 0..3 {
        harness.update(dt);
    }
    harness.events();

    let tss = harness.client.tss();
    let (frame, hash) = (tss.trailing_frame(), tss.trailing_hash());
    harness.to_client(Message::HashCheck { frame, hash });
    harness.update(Duration::ZERO);

    assert!(harness.events().is_empty());
    assert!(!harness.client.is_waiting_for_synchronization());
}

#[test]
fn confirmed_command_is_not_resent() {
    let mut harness = Harness::new();
    harness.join_at(300);
    harness.from_client();

    let key = harness.client.issue_command(TallyCommand::Add(5)).unwrap();
    harness.update(Duration::ZERO);

    let sent = harness.from_client();
    let echo = sent
        .iter()
        .find_map(|m| match m {
            Message::Command { player, command } => Some((*player, command.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(echo.0, 1);
    let decoded = Command::<TallyCommand>::from_bytes(&echo.1).unwrap();
    assert_eq!(decoded.key(), key);
    assert!(!decoded.authoritative);

    harness.to_client(Message::Command {
        player: 1,
        command: echo.1,
    });
    harness.update(Duration::ZERO);
    assert!(!harness.client.is_pending(&key));

    let dt = harness.config.frame_duration();
    for _ in 0..20 {
        harness.update(dt);
    }
    let resent = harness
        .from_client()
        .into_iter()
        .filter(|m| matches!(m, Message::Command { .. }))
        .count();
    assert_eq!(resent, 0);
}

#[test]
fn unconfirmed_command_is_resent() {
    let mut harness = Harness::new();
    harness.join_at(300);

    let key = harness.client.issue_command(TallyCommand::Add(5)).unwrap();
    harness.update(Duration::ZERO);
    harness.from_client();

    let dt = harness.config.frame_duration();
    for _ in 0..7 {
        harness.update(dt);
    }

    let resent = harness
        .from_client()
        .into_iter()
        .filter(|m| matches!(m, Message::Command { .. }))
        .count();
    assert_eq!(resent, 1);
    assert!(harness.client.is_pending(&key));
}

#[test]
fn authoritative_command_for_past_frame_replays() {
    let mut harness = Harness::new();
    harness.join_at(300);
    let before = harness.client.tss().leading_state().get(1).unwrap().total;

    let frame = harness.client.current_frame() - 2;
    let command = Command::new(1, 0, frame, TallyCommand::Add(100));
    harness.to_client(Message::Command {
        player: 1,
        command: command.to_bytes().unwrap(),
    });
    harness.update(Duration::ZERO);

    let after = harness.client.tss().leading_state().get(1).unwrap().total;
    assert_eq!(after, before + 100);
}

#[test]
fn stale_authoritative_command_requests_state() {
    let mut harness = Harness::new();
    harness.join_at(300);
    harness.events();
    harness.from_client();

    let frame = harness.client.tss().trailing_frame() - 1;
    let command = Command::new(2, 0, frame, TallyCommand::Add(1));
    harness.to_client(Message::Command {
        player: 2,
        command: command.to_bytes().unwrap(),
    });
    harness.update(Duration::ZERO);

    assert!(harness.client.is_waiting_for_synchronization());
    assert!(harness.from_client().contains(&Message::GameStateRequest));
}

#[test]
fn state_request_is_resent_while_waiting() {
    let mut harness = Harness::new();
    harness.client.connect().unwrap();
    harness.to_client(Message::JoinAccepted { player: 1, frame: 0 });
    harness.update(Duration::ZERO);
    harness.from_client();

    harness.update(Duration::from_millis(500));
    assert!(harness.from_client().is_empty());

    harness.update(Duration::from_millis(600));
    assert_eq!(harness.from_client(), vec![Message::GameStateRequest]);
}

#[test]
fn join_is_resent_until_answered() {
    let mut harness = Harness::new();
    harness.client.connect().unwrap();
    harness.from_client();

    harness.update(Duration::from_millis(1100));
    assert!(matches!(
        harness.from_client().as_slice(),
        [Message::JoinRequest { .. }]
    ));
}

#[test]
fn denied_join_disconnects() {
    let mut harness = Harness::new();
    harness.client.connect().unwrap();
    harness.to_client(Message::JoinDenied {
        reason: String::from("server full"),
    });
    harness.update(Duration::ZERO);

    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    assert!(harness.events().contains(&ControllerEvent::Disconnected {
        reason: DisconnectReason::Denied
    }));
}

#[test]
fn silent_server_times_out() {
    let mut harness = Harness::new();
    harness.join_at(100);

    for _ in 0..11 {
        harness.update(Duration::from_secs(1));
    }
    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    assert!(harness.events().contains(&ControllerEvent::Disconnected {
        reason: DisconnectReason::TimedOut
    }));
}

#[test]
fn commands_need_a_synchronized_session() {
    let mut harness = Harness::new();
    assert!(harness.client.issue_command(TallyCommand::Add(1)).is_err());

    harness.client.connect().unwrap();
    harness.to_client(Message::JoinAccepted { player: 1, frame: 0 });
    harness.update(Duration::ZERO);
    assert!(matches!(
        harness.client.issue_command(TallyCommand::Add(1)),
        Err(trailsync::ControllerError::AwaitingSnapshot)
    ));
}

#[test]
fn datagrams_from_strangers_are_ignored() {
    let mut harness = Harness::new();
    harness.join_at(100);
    harness.events();

    let network = harness.server.network().clone();
    let mut stranger = network.endpoint();
    send_message(
        &mut stranger,
        harness.client_addr,
        Message::HashCheck { frame: 90, hash: 0 },
    );
    stranger
        .send(&[0xFF, 1, 2], Some(harness.client_addr))
        .unwrap();
    stranger.flush().unwrap();
    harness.update(Duration::ZERO);

    assert!(harness.events().is_empty());
    assert!(!harness.client.is_waiting_for_synchronization());
}

#[test]
fn late_echo_of_confirmed_command_is_ignored() {
    let mut harness = Harness::new();
    harness.join_at(300);
    harness.from_client();

    let key = harness.client.issue_command(TallyCommand::Add(5)).unwrap();
    harness.update(Duration::ZERO);
    let echo = harness
        .from_client()
        .into_iter()
        .find(|m| matches!(m, Message::Command { .. }))
        .unwrap();

    harness.to_client(echo.clone());
    harness.update(Duration::ZERO);
    assert!(!harness.client.is_pending(&key));

    let dt = harness.config.frame_duration();
    for _ in 0..25 {
        harness.update(dt);
    }
    assert!(harness.client.tss().trailing_frame() > key.frame);
    harness.events();
    harness.from_client();

    harness.to_client(echo);
    harness.update(Duration::ZERO);

    assert!(!harness.client.is_waiting_for_synchronization());
    assert!(!harness
        .events()
        .iter()
        .any(|e| matches!(e, ControllerEvent::Invalidated { .. })));
    assert!(!harness.from_client().contains(&Message::GameStateRequest));
}

#[test]
fn unseen_stale_command_still_invalidates_after_confirmations() {
    let mut harness = Harness::new();
    harness.join_at(300);

    let key = harness.client.issue_command(TallyCommand::Add(5)).unwrap();
    harness.update(Duration::ZERO);
    let echo = harness
        .from_client()
        .into_iter()
        .find(|m| matches!(m, Message::Command { .. }))
        .unwrap();
    harness.to_client(echo);
    harness.update(Duration::ZERO);
    assert!(!harness.client.is_pending(&key));

    let dt = harness.config.frame_duration();
    for _ in 0..25 {
        harness.update(dt);
    }

    let unseen = Command::new(1, key.id + 1, key.frame, TallyCommand::Add(2));
    harness.to_client(Message::Command {
        player: 1,
        command: unseen.to_bytes().unwrap(),
    });
    harness.update(Duration::ZERO);

    assert!(harness.client.is_waiting_for_synchronization());
}

#[test]
fn clock_catch_up_resolves_held_hash_checks() {
    let mut harness = Harness::new();
    harness.join_at(1000);
    harness.events();

    let checked = harness.client.tss().trailing_frame() + 3;
    harness.to_client(Message::HashCheck {
        frame: checked,
        hash: 0xdead,
    });
    harness.to_client(Message::Synchronize {
        sent_frame: 1000,
        server_frame: Some(1010),
    });
    harness.update(Duration::ZERO);

    let events = harness.events();
    assert!(events.contains(&ControllerEvent::ClockAdjusted { delta: 10 }));
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::HashMismatch { frame, .. } if *frame == checked)));
    assert!(harness.client.is_waiting_for_synchronization());
}
