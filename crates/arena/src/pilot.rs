use trailsync::{Frame, PlayerId};

use crate::controls::ShipControls;

const PATTERNS: [ShipControls; 6] = [
    ShipControls::THRUST,
    ShipControls::THRUST.union(ShipControls::TURN_LEFT),
    ShipControls::THRUST.union(ShipControls::TURN_RIGHT),
    ShipControls::TURN_LEFT,
    ShipControls::BRAKE,
    ShipControls::empty(),
];

/// Scripted input for headless clients: switches to a new pattern every `interval` frames.
#[derive(Debug, Clone)]
pub struct BotPilot {
    state: u64,
    interval: Frame,
    current: ShipControls,
    next_change: Frame,
}

impl BotPilot {
    pub fn new(player: PlayerId, interval: Frame) -> Self {
        Self {
            state: 0x9E37_79B9_7F4A_7C15 ^ u64::from(player),
            interval: interval.max(1),
            current: ShipControls::empty(),
            next_change: 0,
        }
    }

    pub fn controls(&self) -> ShipControls {
        self.current
    }

    /// New controls to send at `frame`, if they changed.
    pub fn poll(&mut self, frame: Frame) -> Option<ShipControls> {
        if frame < self.next_change {
            return None;
        }
        self.next_change = frame + self.interval;

        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let pick = PATTERNS[(self.state >> 33) as usize % PATTERNS.len()];

        if pick == self.current {
            return None;
        }
        self.current = pick;
        Some(pick)
    }
}
