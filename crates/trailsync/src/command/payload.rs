use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::{Frame, PlayerId};

/// Game-defined command content. Blanket-implemented for every suitable type.
pub trait CommandPayload: Clone + Debug + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> CommandPayload for T where T: Clone + Debug + PartialEq + Serialize + DeserializeOwned + 'static
{}

/// Identity used for duplicate detection; also the in-frame application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKey {
    pub frame: Frame,
    pub player: PlayerId,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command<C> {
    /// Per-player sequence number, assigned by the issuing peer.
    pub id: u32,
    pub player: PlayerId,
    pub frame: Frame,
    pub authoritative: bool,
    pub payload: C,
}

impl<C> Command<C> {
    pub fn new(player: PlayerId, id: u32, frame: Frame, payload: C) -> Self {
        Self {
            id,
            player,
            frame,
            authoritative: false,
            payload,
        }
    }

    pub fn authoritative(mut self) -> Self {
        self.authoritative = true;
        self
    }

    pub fn key(&self) -> CommandKey {
        CommandKey {
            frame: self.frame,
            player: self.player,
            id: self.id,
        }
    }
}

impl<C: CommandPayload> Command<C> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        codec::decode(data)
    }
}
