use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Held ship inputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShipControls: u8 {
        const THRUST = 0b0000_0001;
        const TURN_LEFT = 0b0000_0010;
        const TURN_RIGHT = 0b0000_0100;
        const BRAKE = 0b0000_1000;
    }
}

// Stored as the raw bits so the encoding stays one byte.
impl Serialize for ShipControls {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ShipControls {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        Ok(ShipControls::from_bits_truncate(bits))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArenaCommand {
    /// Replaces the held controls of the sender's ship.
    SetControls(ShipControls),
}
