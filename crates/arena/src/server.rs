use std::collections::BTreeMap;
use std::time::Duration;

use trailsync::{
    ControllerError, ControllerEvent, EntityId, PlayerId, ServerController, SyncConfig, Transport,
};

use crate::entity::{ArenaEntity, Asteroid, Ship};

/// Game rules on top of the session: asteroids at start, one ship per connected player.
pub struct ArenaServer<T: Transport> {
    controller: ServerController<ArenaEntity, T>,
    ships: BTreeMap<PlayerId, EntityId>,
}

impl<T: Transport> ArenaServer<T> {
    pub fn new(
        config: SyncConfig,
        transport: T,
        asteroids: usize,
        seed: u64,
    ) -> Result<Self, ControllerError> {
        let mut controller = ServerController::new(config, transport)?;
        for asteroid in Asteroid::field(seed, asteroids) {
            controller.add_steppable(asteroid.into())?;
        }
        log::info!("Spawned {} asteroids", asteroids);

        Ok(Self {
            controller,
            ships: BTreeMap::new(),
        })
    }

    /// Runs the session and reacts to joins and leaves. Returns the session events.
    pub fn update(&mut self, elapsed: Duration) -> Result<Vec<ControllerEvent>, ControllerError> {
        self.controller.update(elapsed)?;

        let events: Vec<ControllerEvent> = self.controller.drain_events().collect();
        for event in &events {
            match event {
                ControllerEvent::PlayerJoined { player, .. } => {
                    let id = self
                        .controller
                        .add_steppable(Ship::spawn_for(*player).into())?;
                    log::info!("Ship {} spawned for player {}", id, player);
                    self.ships.insert(*player, id);
                }
                ControllerEvent::PlayerLeft { player, .. } => {
                    if let Some(id) = self.ships.remove(player) {
                        self.controller.remove_steppable(id)?;
                        log::info!("Ship {} of player {} removed", id, player);
                    }
                }
                _ => {}
            }
        }
        Ok(events)
    }

    pub fn ship_of(&self, player: PlayerId) -> Option<EntityId> {
        self.ships.get(&player).copied()
    }

    pub fn controller(&self) -> &ServerController<ArenaEntity, T> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ServerController<ArenaEntity, T> {
        &mut self.controller
    }
}
