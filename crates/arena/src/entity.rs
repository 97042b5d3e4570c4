use glam::IVec2;
use serde::{Deserialize, Serialize};
use trailsync::{Command, EntityId, Frame, PlayerId, Steppable};

use crate::controls::{ArenaCommand, ShipControls};

/// Sub-units per arena unit.
pub const FIXED_ONE: i32 = 256;
pub const ARENA_SIZE: IVec2 = IVec2::new(800 * FIXED_ONE, 600 * FIXED_ONE);
pub const MAX_SPEED: i32 = 6 * FIXED_ONE;

const HEADINGS: u8 = 64;
const THRUST: i32 = 8;
const DRAG_SHIFT: i32 = 6;
const BRAKE_SHIFT: i32 = 3;

/// round(sin(k * pi / 32) * 64) for the first quadrant.
const SIN_QUARTER: [i32; 17] = [
    0, 6, 12, 19, 24, 30, 36, 41, 45, 49, 53, 56, 59, 61, 63, 64, 64,
];

/// Unit direction for `heading` (64 steps per turn), scaled by 64.
pub fn heading_vector(heading: u8) -> IVec2 {
    IVec2::new(sin64(heading.wrapping_add(16)), sin64(heading))
}

fn sin64(heading: u8) -> i32 {
    let step = (heading % HEADINGS) as usize;
    match step / 16 {
        0 => SIN_QUARTER[step],
        1 => SIN_QUARTER[32 - step],
        2 => -SIN_QUARTER[step - 32],
        _ => -SIN_QUARTER[64 - step],
    }
}

fn wrap(position: IVec2) -> IVec2 {
    IVec2::new(
        position.x.rem_euclid(ARENA_SIZE.x),
        position.y.rem_euclid(ARENA_SIZE.y),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ship {
    pub id: EntityId,
    pub owner: PlayerId,
    pub position: IVec2,
    pub velocity: IVec2,
    pub heading: u8,
    pub controls: ShipControls,
}

impl Ship {
    pub fn new(owner: PlayerId, position: IVec2) -> Self {
        Self {
            id: 0,
            owner,
            position: wrap(position),
            velocity: IVec2::ZERO,
            heading: 0,
            controls: ShipControls::empty(),
        }
    }

    /// Spawn point spread around the arena by player number.
    pub fn spawn_for(owner: PlayerId) -> Self {
        let slot = owner as i32 % 8;
        let position = IVec2::new(
            ARENA_SIZE.x / 9 * (slot + 1),
            ARENA_SIZE.y / 2 + (slot % 2) * FIXED_ONE * 64,
        );
        Self::new(owner, position)
    }

    fn step(&mut self) {
        if self.controls.contains(ShipControls::TURN_LEFT) {
            self.heading = (self.heading + HEADINGS - 1) % HEADINGS;
        }
        if self.controls.contains(ShipControls::TURN_RIGHT) {
            self.heading = (self.heading + 1) % HEADINGS;
        }
        if self.controls.contains(ShipControls::THRUST) {
            self.velocity += heading_vector(self.heading) * THRUST / 8;
        }
        if self.controls.contains(ShipControls::BRAKE) {
            self.velocity -= self.velocity >> BRAKE_SHIFT;
        }

        self.velocity -= self.velocity >> DRAG_SHIFT;
        self.velocity = self.velocity.clamp(IVec2::splat(-MAX_SPEED), IVec2::splat(MAX_SPEED));
        self.position = wrap(self.position + self.velocity);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asteroid {
    pub id: EntityId,
    pub position: IVec2,
    pub velocity: IVec2,
    pub radius: i32,
}

impl Asteroid {
    pub fn new(position: IVec2, velocity: IVec2, radius: i32) -> Self {
        Self {
            id: 0,
            position: wrap(position),
            velocity,
            radius,
        }
    }

    /// Deterministic field of `count` asteroids derived from `seed`.
    pub fn field(seed: u64, count: usize) -> Vec<Self> {
        let mut state = seed | 1;
        let mut next = move |bound: i32| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % bound as u64) as i32
        };

        (0..count)
            .map(|_| {
                let position = IVec2::new(next(ARENA_SIZE.x), next(ARENA_SIZE.y));
                let velocity = IVec2::new(next(2 * FIXED_ONE), next(2 * FIXED_ONE)) - FIXED_ONE;
                let radius = (8 + next(24)) * FIXED_ONE;
                Self::new(position, velocity, radius)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArenaEntity {
    Ship(Ship),
    Asteroid(Asteroid),
}

impl ArenaEntity {
    pub fn position(&self) -> IVec2 {
        match self {
            Self::Ship(ship) => ship.position,
            Self::Asteroid(asteroid) => asteroid.position,
        }
    }
}

impl From<Ship> for ArenaEntity {
    fn from(ship: Ship) -> Self {
        Self::Ship(ship)
    }
}

impl From<Asteroid> for ArenaEntity {
    fn from(asteroid: Asteroid) -> Self {
        Self::Asteroid(asteroid)
    }
}

impl Steppable for ArenaEntity {
    type Command = ArenaCommand;

    fn id(&self) -> EntityId {
        match self {
            Self::Ship(ship) => ship.id,
            Self::Asteroid(asteroid) => asteroid.id,
        }
    }

    fn set_id(&mut self, id: EntityId) {
        match self {
            Self::Ship(ship) => ship.id = id,
            Self::Asteroid(asteroid) => asteroid.id = id,
        }
    }

    fn step(&mut self, _frame: Frame) {
        match self {
            Self::Ship(ship) => ship.step(),
            Self::Asteroid(asteroid) => {
                asteroid.position = wrap(asteroid.position + asteroid.velocity);
            }
        }
    }

    fn apply_command(&mut self, command: &Command<ArenaCommand>) {
        let Self::Ship(ship) = self else {
            return;
        };
        if ship.owner != command.player {
            return;
        }
        match command.payload {
            ArenaCommand::SetControls(controls) => ship.controls = controls,
        }
    }
}
