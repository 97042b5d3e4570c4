//! Ships and asteroids on a wrapping field, simulated in integer fixed point.

mod controls;
mod entity;
mod pilot;
mod server;

pub use controls::{ArenaCommand, ShipControls};
pub use entity::{ARENA_SIZE, ArenaEntity, Asteroid, FIXED_ONE, MAX_SPEED, Ship, heading_vector};
pub use pilot::BotPilot;
pub use server::ArenaServer;

use trailsync::{PlayerId, SimulationState};

/// The ship owned by `player`, if it exists in `state`.
pub fn find_ship(state: &SimulationState<ArenaEntity>, player: PlayerId) -> Option<&Ship> {
    state.entities().find_map(|entity| match entity {
        ArenaEntity::Ship(ship) if ship.owner == player => Some(ship),
        _ => None,
    })
}
