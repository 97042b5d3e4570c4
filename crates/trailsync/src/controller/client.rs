use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use super::{
    ConnectionState, ControllerError, ControllerEvent, DisconnectReason, FixedTimestep, SyncConfig,
    is_due,
};
use crate::codec;
use crate::command::{Command, CommandKey};
use crate::net::{Message, Packet, Transport};
use crate::state::Steppable;
use crate::sync::{ClockSync, HashVerdict, HashVerifier, frame_delta};
use crate::tss::{Tss, TssError, TssEvent};
use crate::{EntityId, Frame, PlayerId};

/// Frames behind the trailing frame for which applied authoritative commands are remembered.
const CONFIRMED_HISTORY: Frame = 600;

struct PendingCommand<C> {
    command: Command<C>,
    last_sent: Duration,
}

/// Client side of a session: speculates local commands, follows the server's authority and
/// keeps its frame counter aligned with the server's.
pub struct ClientController<E: Steppable, T: Transport> {
    config: SyncConfig,
    transport: T,
    server_addr: SocketAddr,
    player_name: String,
    tss: Tss<E>,
    state: ConnectionState,
    player: Option<PlayerId>,
    clock: ClockSync,
    hashes: HashVerifier,
    timestep: FixedTimestep,
    hold_frames: u64,
    now: Duration,
    last_receive: Duration,
    last_join_sent: Option<Duration>,
    last_sync_sent: Option<Duration>,
    last_state_request: Option<Duration>,
    next_command_id: u32,
    pending: BTreeMap<CommandKey, PendingCommand<E::Command>>,
    confirmed: BTreeSet<CommandKey>,
    events: VecDeque<ControllerEvent>,
}

impl<E: Steppable, T: Transport> ClientController<E, T> {
    pub fn new(
        config: SyncConfig,
        transport: T,
        server_addr: SocketAddr,
        player_name: impl Into<String>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let tss = Tss::new(&config.delay_frames())?;

        Ok(Self {
            clock: ClockSync::new(config.clock_window, config.clock_threshold),
            hashes: HashVerifier::new(config.hash_history),
            timestep: FixedTimestep::new(config.tick_rate, config.max_catch_up),
            config,
            transport,
            server_addr,
            player_name: player_name.into(),
            tss,
            state: ConnectionState::Disconnected,
            player: None,
            hold_frames: 0,
            now: Duration::ZERO,
            last_receive: Duration::ZERO,
            last_join_sent: None,
            last_sync_sent: None,
            last_state_request: None,
            next_command_id: 0,
            pending: BTreeMap::new(),
            confirmed: BTreeSet::new(),
            events: VecDeque::new(),
        })
    }

    pub fn connect(&mut self) -> Result<(), ControllerError> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }

        log::info!(
            "Connecting to {} as '{}'",
            self.server_addr,
            self.player_name
        );
        self.state = ConnectionState::Connecting;
        self.last_receive = self.now;
        self.send_join()?;
        self.transport.flush()?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), ControllerError> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        self.send(Message::Leave)?;
        self.transport.flush()?;
        self.set_disconnected(DisconnectReason::Left);
        Ok(())
    }

    /// Advances the session clock by `elapsed`, handles the network and steps the simulation.
    ///
    /// Returns the number of frames the leading copy advanced through regular stepping.
    pub fn update(&mut self, elapsed: Duration) -> Result<u32, ControllerError> {
        self.now += elapsed;
        self.poll()?;
        self.process_tss_events()?;

        let mut stepped = 0;
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => {
                if self.is_timed_out() {
                    log::warn!("No answer from {}", self.server_addr);
                    self.set_disconnected(DisconnectReason::TimedOut);
                } else if is_due(self.now, self.last_join_sent, self.config.join_resend()) {
                    self.send_join()?;
                }
            }
            ConnectionState::Connected => {
                if self.is_timed_out() {
                    log::warn!("Connection to {} timed out", self.server_addr);
                    self.set_disconnected(DisconnectReason::TimedOut);
                } else if self.tss.is_waiting_for_synchronization() {
                    if is_due(
                        self.now,
                        self.last_state_request,
                        self.config.state_request_resend(),
                    ) {
                        self.request_state()?;
                    }
                } else {
                    self.timestep.accumulate(elapsed);
                    stepped = self.step_frames();
                    self.process_tss_events()?;

                    if !self.tss.is_waiting_for_synchronization() {
                        self.send_sync_if_due()?;
                        self.resend_pending()?;
                    }
                }
            }
        }

        self.transport.flush()?;
        Ok(stepped)
    }

    /// Schedules `payload` for the current frame, speculatively applied until the server confirms.
    pub fn issue_command(&mut self, payload: E::Command) -> Result<CommandKey, ControllerError> {
        let player = match (self.state, self.player) {
            (ConnectionState::Connected, Some(player)) => player,
            _ => return Err(ControllerError::NotConnected),
        };
        if self.tss.is_waiting_for_synchronization() {
            return Err(ControllerError::AwaitingSnapshot);
        }

        let command = Command::new(
            player,
            self.next_command_id,
            self.tss.current_frame(),
            payload,
        );
        self.next_command_id = self.next_command_id.wrapping_add(1);

        let key = command.key();
        let bytes = command.to_bytes()?;
        self.tss.push_command(command.clone())?;
        self.send(Message::Command {
            player,
            command: bytes,
        })?;
        self.pending.insert(
            key,
            PendingCommand {
                command,
                last_sent: self.now,
            },
        );
        Ok(key)
    }

    pub fn tss(&self) -> &Tss<E> {
        &self.tss
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    pub fn is_from_server(&self, addr: &SocketAddr) -> bool {
        *addr == self.server_addr
    }

    pub fn is_waiting_for_synchronization(&self) -> bool {
        self.tss.is_waiting_for_synchronization()
    }

    pub fn current_frame(&self) -> Frame {
        self.tss.current_frame()
    }

    /// Commands sent but not yet confirmed by the server.
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &CommandKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ControllerEvent> + '_ {
        self.events.drain(..)
    }

    fn poll(&mut self) -> Result<(), ControllerError> {
        for (data, addr) in self.transport.receive()? {
            if !self.is_from_server(&addr) {
                log::debug!("Ignoring datagram from {}", addr);
                continue;
            }

            let packet = match Packet::deserialize(&data) {
                Ok(packet) => packet,
                Err(e) => {
                    log::warn!("Malformed packet from server: {}", e);
                    self.transport.stats_mut().malformed_packets += 1;
                    continue;
                }
            };

            self.last_receive = self.now;
            let kind = packet.kind();
            if let Err(e) = self.handle_message(packet.message) {
                log::warn!("Failed to handle {:?}: {}", kind, e);
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, message: Message) -> Result<(), ControllerError> {
        let joining = matches!(
            message,
            Message::JoinAccepted { .. } | Message::JoinDenied { .. }
        );
        if self.state != ConnectionState::Connected && !joining {
            log::debug!("Ignoring {:?} while {:?}", message.kind(), self.state);
            return Ok(());
        }

        match message {
            Message::JoinAccepted { player, frame } => self.on_join_accepted(player, frame),
            Message::JoinDenied { reason } => {
                if self.state == ConnectionState::Connecting {
                    log::warn!("Join denied: {}", reason);
                    self.events.push_back(ControllerEvent::JoinDenied { reason });
                    self.set_disconnected(DisconnectReason::Denied);
                }
                Ok(())
            }
            Message::Leave => {
                self.set_disconnected(DisconnectReason::Kicked);
                Ok(())
            }
            Message::Command { player, command } => self.on_command(player, &command),
            Message::Synchronize {
                sent_frame,
                server_frame: Some(server_frame),
            } => {
                self.on_synchronize(sent_frame, server_frame);
                Ok(())
            }
            Message::GameStateResponse { snapshot } => self.on_game_state(&snapshot),
            Message::AddGameObject { frame, entity } => self.on_add(frame, &entity),
            Message::RemoveGameObject { frame, entity_id } => self.on_remove(frame, entity_id),
            Message::HashCheck { frame, hash } => {
                self.on_hash_check(frame, hash);
                Ok(())
            }
            Message::PlayerJoined { player, name } => {
                log::info!("Player {} ({}) joined", player, name);
                self.events
                    .push_back(ControllerEvent::PlayerJoined { player, name });
                Ok(())
            }
            Message::PlayerLeft { player } => {
                log::info!("Player {} left", player);
                self.events.push_back(ControllerEvent::PlayerLeft {
                    player,
                    reason: DisconnectReason::Left,
                });
                Ok(())
            }
            other => {
                log::debug!("Unexpected {:?} from server", other.kind());
                Ok(())
            }
        }
    }

    fn on_join_accepted(&mut self, player: PlayerId, frame: Frame) -> Result<(), ControllerError> {
        if self.state != ConnectionState::Connecting {
            log::debug!("Duplicate join acceptance");
            return Ok(());
        }

        log::info!("Joined as player {} at server frame {}", player, frame);
        self.state = ConnectionState::Connected;
        self.player = Some(player);
        self.events
            .push_back(ControllerEvent::Connected { player, frame });

        // A fresh session has no state; the first snapshot comes through the invalidation path.
        if !self.tss.invalidate() {
            self.request_state()?;
        }
        Ok(())
    }

    fn on_command(&mut self, player: PlayerId, bytes: &[u8]) -> Result<(), ControllerError> {
        let mut command = Command::<E::Command>::from_bytes(bytes)?;
        command.player = player;
        command.authoritative = true;

        let key = command.key();
        if self.pending.remove(&key).is_some() {
            log::debug!("Command {:?} confirmed", key);
        }

        // The server echoes every resend, so late copies of applied commands are expected.
        if key.frame < self.tss.trailing_frame() && self.confirmed.contains(&key) {
            log::debug!("Ignoring re-delivered command {:?}", key);
            return Ok(());
        }

        match self.tss.push_command(command) {
            Ok(outcome) => {
                log::debug!("Command {:?}: {:?}", key, outcome);
                self.remember_confirmed(key);
                Ok(())
            }
            Err(TssError::AwaitingSnapshot) => Ok(()),
            Err(TssError::Stale { frame, trailing }) => {
                log::warn!(
                    "Authoritative command for frame {} arrived behind trailing frame {}",
                    frame,
                    trailing
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remember_confirmed(&mut self, key: CommandKey) {
        self.confirmed.insert(key);
        let oldest = CommandKey {
            frame: self.tss.trailing_frame().saturating_sub(CONFIRMED_HISTORY),
            player: 0,
            id: 0,
        };
        self.confirmed = self.confirmed.split_off(&oldest);
    }

    fn on_synchronize(&mut self, sent_frame: Frame, server_frame: Frame) {
        if self.tss.is_waiting_for_synchronization() {
            return;
        }

        let delta = frame_delta(self.tss.current_frame(), sent_frame, server_frame);
        log::debug!(
            "Clock sample {} (sent {}, server {})",
            delta,
            sent_frame,
            server_frame
        );

        if let Some(correction) = self.clock.push(delta) {
            self.apply_clock_correction(correction);
        }
    }

    fn apply_clock_correction(&mut self, correction: i64) {
        let current = self.tss.current_frame();
        if correction > 0 {
            self.hold_frames = 0;
            let target = current + correction as u64;
            while self.tss.current_frame() < target && !self.tss.is_waiting_for_synchronization() {
                self.advance();
            }
        } else {
            self.hold_frames += correction.unsigned_abs();
        }

        log::info!(
            "Clock adjusted by {} frames at frame {}",
            correction,
            current
        );
        self.events.push_back(ControllerEvent::ClockAdjusted { delta: correction });
    }

    fn on_game_state(&mut self, snapshot: &[u8]) -> Result<(), ControllerError> {
        if !self.tss.is_waiting_for_synchronization() {
            log::debug!("Ignoring unrequested snapshot");
            return Ok(());
        }

        self.tss.depacketize(snapshot)?;
        self.hashes.clear();
        self.clock.reset();
        self.timestep.reset();
        self.hold_frames = 0;
        self.last_sync_sent = None;

        // Speculation that is still in range survives the snapshot.
        let trailing = self.tss.trailing_frame();
        for (key, entry) in std::mem::take(&mut self.pending) {
            if key.frame < trailing {
                log::debug!("Dropping unconfirmed command {:?}", key);
                continue;
            }
            match self.tss.push_command(entry.command.clone()) {
                Ok(_) => {
                    self.pending.insert(key, entry);
                }
                Err(e) => log::debug!("Dropping unconfirmed command {:?}: {}", key, e),
            }
        }

        log::info!(
            "Synchronized at frame {} (trailing {})",
            self.tss.current_frame(),
            trailing
        );
        Ok(())
    }

    fn on_add(&mut self, frame: Frame, bytes: &[u8]) -> Result<(), ControllerError> {
        let entity: E = codec::decode(bytes)?;
        match self.tss.add_steppable(entity, frame) {
            Ok(id) => {
                log::debug!("Entity {} added at frame {}", id, frame);
                Ok(())
            }
            Err(TssError::AwaitingSnapshot | TssError::Stale { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn on_remove(&mut self, frame: Frame, id: EntityId) -> Result<(), ControllerError> {
        match self.tss.remove_steppable(id, frame) {
            Ok(_) => {
                log::debug!("Entity {} removed at frame {}", id, frame);
                Ok(())
            }
            Err(TssError::AwaitingSnapshot | TssError::Stale { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn on_hash_check(&mut self, frame: Frame, hash: u64) {
        if self.tss.is_waiting_for_synchronization() {
            return;
        }
        let verdict = self.hashes.check(frame, hash);
        self.handle_verdict(verdict);
    }

    fn handle_verdict(&mut self, verdict: HashVerdict) {
        match verdict {
            HashVerdict::Mismatch {
                frame,
                local,
                remote,
            } => {
                log::warn!(
                    "Hash mismatch at frame {}: local {:#018x}, server {:#018x}",
                    frame,
                    local,
                    remote
                );
                self.events.push_back(ControllerEvent::HashMismatch {
                    frame,
                    local,
                    remote,
                });
                self.tss.invalidate();
            }
            HashVerdict::Match => log::debug!("Hash check passed"),
            HashVerdict::Unavailable => log::debug!("Hash check arrived too late"),
            HashVerdict::Pending => {}
        }
    }

    fn step_frames(&mut self) -> u32 {
        let ticks = self.timestep.take_ticks();
        let mut stepped = 0;

        for _ in 0..ticks {
            if self.tss.is_waiting_for_synchronization() {
                break;
            }
            if self.hold_frames > 0 {
                self.hold_frames -= 1;
                continue;
            }

            self.advance();
            stepped += 1;
        }
        stepped
    }

    /// Steps one frame and records the new trailing hash, so no held hash check is skipped.
    fn advance(&mut self) {
        self.tss.update();

        let frame = self.tss.trailing_frame();
        let hash = self.tss.trailing_hash();
        if let Some(verdict) = self.hashes.observe(frame, hash) {
            self.handle_verdict(verdict);
        }
    }

    fn process_tss_events(&mut self) -> Result<(), ControllerError> {
        let events: Vec<TssEvent> = self.tss.drain_events().collect();
        for event in events {
            match event {
                TssEvent::Invalidated { frame } => {
                    self.hashes.clear();
                    self.events
                        .push_back(ControllerEvent::Invalidated { frame });
                    if self.state == ConnectionState::Connected {
                        self.request_state()?;
                    }
                }
                TssEvent::Synchronized { frame } => {
                    self.events
                        .push_back(ControllerEvent::Synchronized { frame });
                }
            }
        }
        Ok(())
    }

    fn send_sync_if_due(&mut self) -> Result<(), ControllerError> {
        if !is_due(self.now, self.last_sync_sent, self.config.sync_interval()) {
            return Ok(());
        }
        self.last_sync_sent = Some(self.now);
        self.send(Message::Synchronize {
            sent_frame: self.tss.current_frame(),
            server_frame: None,
        })
    }

    fn resend_pending(&mut self) -> Result<(), ControllerError> {
        let Some(player) = self.player else {
            return Ok(());
        };

        let trailing = self.tss.trailing_frame();
        self.pending.retain(|key, _| {
            let live = key.frame >= trailing;
            if !live {
                log::debug!("Command {:?} expired unconfirmed", key);
            }
            live
        });

        let now = self.now;
        let interval = self.config.command_resend();
        let mut resend = Vec::new();
        for entry in self.pending.values_mut() {
            if now.saturating_sub(entry.last_sent) >= interval {
                entry.last_sent = now;
                resend.push(entry.command.to_bytes()?);
            }
        }

        for command in resend {
            self.send(Message::Command { player, command })?;
        }
        Ok(())
    }

    fn request_state(&mut self) -> Result<(), ControllerError> {
        log::info!("Requesting game state");
        self.last_state_request = Some(self.now);
        self.send(Message::GameStateRequest)
    }

    fn send_join(&mut self) -> Result<(), ControllerError> {
        self.last_join_sent = Some(self.now);
        self.send(Message::JoinRequest {
            player_name: self.player_name.clone(),
        })
    }

    fn send(&mut self, message: Message) -> Result<(), ControllerError> {
        let data = Packet::new(message).serialize()?;
        self.transport.send(&data, Some(self.server_addr))?;
        Ok(())
    }

    fn is_timed_out(&self) -> bool {
        self.now.saturating_sub(self.last_receive) > self.config.connection_timeout()
    }

    fn set_disconnected(&mut self, reason: DisconnectReason) {
        log::info!("Disconnected ({:?})", reason);
        self.state = ConnectionState::Disconnected;
        self.player = None;
        self.pending.clear();
        self.confirmed.clear();
        self.last_join_sent = None;
        self.events
            .push_back(ControllerEvent::Disconnected { reason });
    }
}
