use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use xxhash_rust::xxh3::Xxh3;

use crate::command::{Command, CommandPayload};
use crate::{EntityId, Frame};

/// Folded in place of an entity whose serialized form could not be produced.
const UNHASHABLE_MARKER: u64 = 0xBAD5_7A7E_BAD5_7A7E;

/// Streaming 64-bit fingerprint accumulator used for desync detection.
pub struct StateHasher {
    inner: Xxh3,
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHasher {
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.update(&value.to_le_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.inner.digest()
    }
}

/// A unit of simulation advanced by [`SimulationState::step`](super::SimulationState::step).
///
/// Implementations must be fully deterministic: the same entity fed the same commands and
/// stepped through the same frames has to produce identical serialized bytes on every peer.
pub trait Steppable: Clone + Debug + Serialize + DeserializeOwned + 'static {
    type Command: CommandPayload;

    fn id(&self) -> EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Advances the entity from `frame` to `frame + 1`.
    fn step(&mut self, frame: Frame);

    /// Offered every command applied to the owning state, in deterministic order.
    fn apply_command(&mut self, _command: &Command<Self::Command>) {}

    /// Folds the entity content into `hasher`. Defaults to hashing the serialized form.
    fn hash(&self, hasher: &mut StateHasher) {
        match bincode::serialize(self) {
            Ok(bytes) => hasher.write(&bytes),
            Err(e) => {
                log::error!("Failed to serialize entity {} for hashing: {}", self.id(), e);
                hasher.write_u64(UNHASHABLE_MARKER);
                hasher.write_u64(self.id());
            }
        }
    }
}
