use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::steppable::{StateHasher, Steppable};
use crate::codec::{self, CodecError};
use crate::command::Command;
use crate::{EntityId, Frame};

/// One deterministic copy of the simulated world.
///
/// `frame` is the next frame to be processed: commands tagged with `frame` have not been applied
/// yet, everything before it has been stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState<E> {
    frame: Frame,
    entities: BTreeMap<EntityId, E>,
}

impl<E: Steppable> SimulationState<E> {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            entities: BTreeMap::new(),
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn get(&self, id: EntityId) -> Option<&E> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn add(&mut self, entity: E) {
        let id = entity.id();
        if self.entities.insert(id, entity).is_some() {
            log::warn!("Entity {} replaced at frame {}", id, self.frame);
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<E> {
        self.entities.remove(&id)
    }

    pub fn apply_command(&mut self, command: &Command<E::Command>) {
        for entity in self.entities.values_mut() {
            entity.apply_command(command);
        }
    }

    pub fn step(&mut self) {
        let frame = self.frame;
        for entity in self.entities.values_mut() {
            entity.step(frame);
        }
        self.frame += 1;
    }

    pub fn hash(&self, hasher: &mut StateHasher) {
        hasher.write_u64(self.frame);
        hasher.write_u64(self.entities.len() as u64);
        for (id, entity) in &self.entities {
            hasher.write_u64(*id);
            entity.hash(hasher);
        }
    }

    pub fn content_hash(&self) -> u64 {
        let mut hasher = StateHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        codec::decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counter, CounterCommand, command};

    fn populated() -> SimulationState<Counter> {
        let mut state = SimulationState::new(10);
        state.add(Counter::with_id(1, 1));
        state.add(Counter::with_id(2, 2));
        state
    }

    #[test]
    fn step_advances_every_entity_once() {
        let mut state = populated();
        state.step();
        state.step();

        assert_eq!(state.frame(), 12);
        assert!(state.entities().all(|c| c.value == 2));
    }

    #[test]
    fn commands_reach_the_owning_entity() {
        let mut state = populated();
        state.apply_command(&command(2, 0, 10, CounterCommand::Add(5)));

        assert_eq!(state.get(1).unwrap().value, 0);
        assert_eq!(state.get(2).unwrap().value, 5);
    }

    #[test]
    fn clone_steps_identically() {
        let mut original = populated();
        original.apply_command(&command(1, 0, 10, CounterCommand::SetRate(3)));
        let mut copy = original.clone();

        for _ in 0..5 {
            original.step();
            copy.step();
        }

        assert_eq!(original, copy);
        assert_eq!(original.content_hash(), copy.content_hash());
    }

    #[test]
    fn serialization_preserves_hash() {
        let mut state = populated();
        state.step();

        let bytes = state.serialize().unwrap();
        let restored = SimulationState::<Counter>::deserialize(&bytes).unwrap();

        assert_eq!(restored.frame(), state.frame());
        assert_eq!(restored.content_hash(), state.content_hash());
        assert_eq!(restored.serialize().unwrap(), bytes);
    }

    #[test]
    fn hash_depends_on_content() {
        let a = populated();
        let mut b = populated();
        b.remove(2);

        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), populated().content_hash());
    }
}
