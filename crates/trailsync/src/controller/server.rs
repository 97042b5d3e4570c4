use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use super::{ControllerError, ControllerEvent, DisconnectReason, FixedTimestep, SyncConfig, is_due};
use crate::codec;
use crate::command::{Command, CommandKey};
use crate::net::{Message, Packet, PlayerRegistry, Transport};
use crate::state::Steppable;
use crate::tss::{PushOutcome, Tss, TssError, TssEvent};
use crate::{EntityId, Frame, PlayerId};

/// Player number used for commands issued by the server itself.
pub const SERVER_PLAYER: PlayerId = 0;

/// Authoritative side of a session.
pub struct ServerController<E: Steppable, T: Transport> {
    config: SyncConfig,
    transport: T,
    tss: Tss<E>,
    registry: PlayerRegistry,
    timestep: FixedTimestep,
    now: Duration,
    last_hash_check: Option<Duration>,
    next_command_id: u32,
    events: VecDeque<ControllerEvent>,
}

impl<E: Steppable, T: Transport> ServerController<E, T> {
    pub fn new(config: SyncConfig, transport: T) -> Result<Self, ControllerError> {
        config.validate()?;
        let tss = Tss::new(&config.delay_frames())?;

        log::info!(
            "Session on {} with copies at {:?} frames",
            transport.local_addr(),
            tss.delays()
        );

        Ok(Self {
            registry: PlayerRegistry::new(config.max_clients),
            timestep: FixedTimestep::new(config.tick_rate, config.max_catch_up),
            config,
            transport,
            tss,
            now: Duration::ZERO,
            last_hash_check: None,
            next_command_id: 0,
            events: VecDeque::new(),
        })
    }

    /// Advances the session clock by `elapsed`, serves peers and steps the simulation.
    pub fn update(&mut self, elapsed: Duration) -> Result<u32, ControllerError> {
        self.now += elapsed;
        self.poll()?;

        for peer in self
            .registry
            .cleanup_timed_out(self.now, self.config.connection_timeout())
        {
            log::info!("Player {} ({}) timed out", peer.player, peer.addr);
            self.player_left(peer.player, DisconnectReason::TimedOut)?;
        }

        self.timestep.accumulate(elapsed);
        let ticks = self.timestep.take_ticks();
        for _ in 0..ticks {
            self.tss.update();
        }

        if !self.registry.is_empty()
            && is_due(
                self.now,
                self.last_hash_check,
                self.config.hash_check_interval(),
            )
        {
            self.last_hash_check = Some(self.now);
            self.broadcast(Message::HashCheck {
                frame: self.tss.trailing_frame(),
                hash: self.tss.trailing_hash(),
            })?;
        }

        let events: Vec<TssEvent> = self.tss.drain_events().collect();
        for event in events {
            log::error!("Unexpected state event on the server: {:?}", event);
        }

        self.transport.flush()?;
        Ok(ticks)
    }

    /// Issues an authoritative command as [`SERVER_PLAYER`] for the current frame.
    pub fn issue_command(&mut self, payload: E::Command) -> Result<CommandKey, ControllerError> {
        let command = Command::new(
            SERVER_PLAYER,
            self.next_command_id,
            self.tss.current_frame(),
            payload,
        )
        .authoritative();
        self.next_command_id = self.next_command_id.wrapping_add(1);

        let key = command.key();
        let bytes = command.to_bytes()?;
        self.tss.push_command(command)?;
        self.broadcast(Message::Command {
            player: SERVER_PLAYER,
            command: bytes,
        })?;
        Ok(key)
    }

    pub fn add_steppable(&mut self, entity: E) -> Result<EntityId, ControllerError> {
        let frame = self.tss.current_frame();
        self.add_steppable_at(entity, frame)
    }

    /// Schedules `entity` at `frame` on every peer. An id of 0 is replaced by a fresh one.
    pub fn add_steppable_at(&mut self, mut entity: E, frame: Frame) -> Result<EntityId, ControllerError> {
        self.check_frame(frame)?;
        if entity.id() == 0 {
            entity.set_id(self.tss.allocate_entity_id());
        }

        let bytes = codec::encode(&entity)?;
        let id = self.tss.add_steppable(entity, frame)?;
        self.broadcast(Message::AddGameObject {
            frame,
            entity: bytes,
        })?;
        Ok(id)
    }

    pub fn remove_steppable(&mut self, id: EntityId) -> Result<(), ControllerError> {
        let frame = self.tss.current_frame();
        self.remove_steppable_at(id, frame)
    }

    pub fn remove_steppable_at(&mut self, id: EntityId, frame: Frame) -> Result<(), ControllerError> {
        self.check_frame(frame)?;
        self.tss.remove_steppable(id, frame)?;
        self.broadcast(Message::RemoveGameObject {
            frame,
            entity_id: id,
        })
    }

    /// Drops a player and tells them so. Returns false for unknown players.
    pub fn kick(&mut self, player: PlayerId) -> Result<bool, ControllerError> {
        let Some(addr) = self.registry.get(player).map(|peer| peer.addr) else {
            return Ok(false);
        };

        log::info!("Kicking player {} ({})", player, addr);
        self.send_to(addr, Message::Leave)?;
        self.registry.remove(player);
        self.player_left(player, DisconnectReason::Kicked)?;
        Ok(true)
    }

    pub fn tss(&self) -> &Tss<E> {
        &self.tss
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn current_frame(&self) -> Frame {
        self.tss.current_frame()
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
            let packet = match Packet::deserialize(&data) {
                Ok(packet) => packet,
                Err(e) => {
                    log::warn!("Malformed packet from {}: {}", addr, e);
                    self.transport.stats_mut().malformed_packets += 1;
                    continue;
                }
            };

            let kind = packet.kind();
            if let Err(e) = self.handle_message(addr, packet.message) {
                log::warn!("Failed to handle {:?} from {}: {}", kind, addr, e);
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, addr: SocketAddr, message: Message) -> Result<(), ControllerError> {
        if let Message::JoinRequest { player_name } = message {
            return self.on_join(addr, player_name);
        }

        let Some(player) = self.registry.player_of(&addr) else {
            log::debug!("Ignoring {:?} from unknown peer {}", message.kind(), addr);
            return Ok(());
        };
        self.registry.touch(&addr, self.now);

        match message {
            Message::Leave => {
                log::info!("Player {} left", player);
                self.registry.remove(player);
                self.player_left(player, DisconnectReason::Left)
            }
            Message::Command { command, .. } => self.on_command(addr, player, &command),
            Message::Synchronize { sent_frame, .. } => self.send_to(
                addr,
                Message::Synchronize {
                    sent_frame,
                    server_frame: Some(self.tss.current_frame()),
                },
            ),
            Message::GameStateRequest => self.on_state_request(addr),
            other => {
                log::debug!("Unexpected {:?} from player {}", other.kind(), player);
                Ok(())
            }
        }
    }

    fn on_join(&mut self, addr: SocketAddr, name: String) -> Result<(), ControllerError> {
        let frame = self.tss.current_frame();

        if let Some(player) = self.registry.player_of(&addr) {
            self.registry.touch(&addr, self.now);
            return self.send_to(addr, Message::JoinAccepted { player, frame });
        }

        let player = match self.registry.register(addr, &name, self.now) {
            Ok(peer) => peer.player,
            Err(e) => {
                log::warn!("Rejecting {} ({}): {}", name, addr, e);
                return self.send_to(
                    addr,
                    Message::JoinDenied {
                        reason: e.to_string(),
                    },
                );
            }
        };

        log::info!("Player {} ({}) joined from {}", player, name, addr);
        self.send_to(addr, Message::JoinAccepted { player, frame })?;
        self.broadcast_except(
            addr,
            Message::PlayerJoined {
                player,
                name: name.clone(),
            },
        )?;
        self.events
            .push_back(ControllerEvent::PlayerJoined { player, name });
        Ok(())
    }

    fn on_command(
        &mut self,
        addr: SocketAddr,
        player: PlayerId,
        bytes: &[u8],
    ) -> Result<(), ControllerError> {
        let mut command = Command::<E::Command>::from_bytes(bytes)?;
        if command.player != player {
            log::warn!(
                "Player {} sent a command as player {}; rewriting",
                player,
                command.player
            );
        }
        command.player = player;
        command.authoritative = true;

        let trailing = self.tss.trailing_frame();
        if command.frame < trailing {
            log::warn!(
                "Dropping stale command {:?} from player {} (trailing frame {})",
                command.key(),
                player,
                trailing
            );
            return Ok(());
        }

        let key = command.key();
        let bytes = command.to_bytes()?;
        match self.tss.push_command(command)? {
            PushOutcome::Duplicate => {
                let stored = match self.tss.buffer().command(key) {
                    Some(stored) => stored.to_bytes()?,
                    None => bytes,
                };
                log::debug!("Re-confirming command {:?} to player {}", key, player);
                self.send_to(
                    addr,
                    Message::Command {
                        player,
                        command: stored,
                    },
                )
            }
            outcome => {
                log::debug!("Command {:?} from player {}: {:?}", key, player, outcome);
                self.broadcast(Message::Command {
                    player,
                    command: bytes,
                })
            }
        }
    }

    fn on_state_request(&mut self, addr: SocketAddr) -> Result<(), ControllerError> {
        let now = self.now;
        let cooldown = self.config.snapshot_cooldown();
        let Some(peer) = self.registry.get_by_addr_mut(&addr) else {
            return Ok(());
        };

        if !peer.snapshot_allowed(now, cooldown) {
            log::debug!("Snapshot for player {} rate limited", peer.player);
            return Ok(());
        }
        peer.last_snapshot_sent = Some(now);
        let player = peer.player;

        let snapshot = self.tss.packetize()?;
        log::info!(
            "Sending {} byte snapshot at frame {} to player {}",
            snapshot.len(),
            self.tss.current_frame(),
            player
        );
        self.send_to(addr, Message::GameStateResponse { snapshot })
    }

    fn player_left(&mut self, player: PlayerId, reason: DisconnectReason) -> Result<(), ControllerError> {
        self.broadcast(Message::PlayerLeft { player })?;
        self.events
            .push_back(ControllerEvent::PlayerLeft { player, reason });
        Ok(())
    }

    fn check_frame(&self, frame: Frame) -> Result<(), TssError> {
        let trailing = self.tss.trailing_frame();
        if frame < trailing {
            return Err(TssError::Stale { frame, trailing });
        }
        Ok(())
    }

    fn broadcast(&mut self, message: Message) -> Result<(), ControllerError> {
        let data = Packet::new(message).serialize()?;
        for addr in self.registry.addrs() {
            self.transport.send(&data, Some(addr))?;
        }
        Ok(())
    }

    fn broadcast_except(&mut self, except: SocketAddr, message: Message) -> Result<(), ControllerError> {
        let data = Packet::new(message).serialize()?;
        for addr in self.registry.addrs() {
            if addr != except {
                self.transport.send(&data, Some(addr))?;
            }
        }
        Ok(())
    }

    fn send_to(&mut self, addr: SocketAddr, message: Message) -> Result<(), ControllerError> {
        let data = Packet::new(message).serialize()?;
        self.transport.send(&data, Some(addr))?;
        Ok(())
    }
}
