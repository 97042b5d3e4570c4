use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::payload::{Command, CommandKey};
use crate::state::{SimulationState, Steppable};
use crate::{EntityId, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A buffered tentative command was confirmed by an identical authoritative one.
    Upgraded,
    /// A buffered tentative command was overridden by a differing authoritative one.
    Replaced,
    Duplicate,
}

impl InsertOutcome {
    /// Whether copies that already passed the frame have to be regenerated.
    pub fn changes_state(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Everything scheduled for a single frame, kept in application order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FrameOps<E: Steppable> {
    removes: Vec<EntityId>,
    adds: Vec<E>,
    commands: Vec<Command<E::Command>>,
}

impl<E: Steppable> Default for FrameOps<E> {
    fn default() -> Self {
        Self {
            removes: Vec::new(),
            adds: Vec::new(),
            commands: Vec::new(),
        }
    }
}

impl<E: Steppable> FrameOps<E> {
    pub fn removes(&self) -> &[EntityId] {
        &self.removes
    }

    pub fn adds(&self) -> &[E] {
        &self.adds
    }

    /// Commands sorted by owning player, then by the player's issuance order.
    pub fn commands(&self) -> &[Command<E::Command>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.removes.len() + self.adds.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_to(&self, state: &mut SimulationState<E>) {
        for id in &self.removes {
            if state.remove(*id).is_none() {
                log::debug!("Remove of unknown entity {} at frame {}", id, state.frame());
            }
        }
        for entity in &self.adds {
            state.add(entity.clone());
        }
        for command in &self.commands {
            state.apply_command(command);
        }
    }
}

/// Frame-keyed store of pending and recently applied operations.
///
/// History is retained until [`purge_before`](Self::purge_before) so that rollback replay can
/// reapply the exact same inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FrameCommandBuffer<E: Steppable> {
    frames: BTreeMap<Frame, FrameOps<E>>,
}

impl<E: Steppable> Default for FrameCommandBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Steppable> FrameCommandBuffer<E> {
    pub fn new() -> Self {
        Self {
            frames: BTreeMap::new(),
        }
    }

    pub fn insert_command(&mut self, command: Command<E::Command>) -> InsertOutcome {
        let ops = self.frames.entry(command.frame).or_default();
        let position = ops
            .commands
            .binary_search_by(|c| (c.player, c.id).cmp(&(command.player, command.id)));

        match position {
            Err(index) => {
                ops.commands.insert(index, command);
                InsertOutcome::Inserted
            }
            Ok(index) => {
                let existing = &mut ops.commands[index];
                if existing.authoritative || !command.authoritative {
                    if existing.payload != command.payload {
                        log::warn!(
                            "Conflicting re-delivery of command {:?} ignored",
                            command.key()
                        );
                    }
                    InsertOutcome::Duplicate
                } else if existing.payload == command.payload {
                    existing.authoritative = true;
                    InsertOutcome::Upgraded
                } else {
                    *existing = command;
                    InsertOutcome::Replaced
                }
            }
        }
    }

    pub fn insert_add(&mut self, frame: Frame, entity: E) -> InsertOutcome {
        let ops = self.frames.entry(frame).or_default();
        if ops.adds.iter().any(|e| e.id() == entity.id()) {
            return InsertOutcome::Duplicate;
        }
        ops.adds.push(entity);
        InsertOutcome::Inserted
    }

    pub fn insert_remove(&mut self, frame: Frame, id: EntityId) -> InsertOutcome {
        let ops = self.frames.entry(frame).or_default();
        if ops.removes.contains(&id) {
            return InsertOutcome::Duplicate;
        }
        ops.removes.push(id);
        InsertOutcome::Inserted
    }

    /// Applies the operations buffered for the state's current frame. Does not step.
    pub fn apply(&self, state: &mut SimulationState<E>) {
        if let Some(ops) = self.frames.get(&state.frame()) {
            ops.apply_to(state);
        }
    }

    pub fn get(&self, frame: Frame) -> Option<&FrameOps<E>> {
        self.frames.get(&frame)
    }

    pub fn command(&self, key: CommandKey) -> Option<&Command<E::Command>> {
        self.frames.get(&key.frame).and_then(|ops| {
            ops.commands
                .iter()
                .find(|c| c.player == key.player && c.id == key.id)
        })
    }

    /// Drops every frame older than `frame`.
    pub fn purge_before(&mut self, frame: Frame) {
        self.frames = self.frames.split_off(&frame);
    }

    pub fn oldest_frame(&self) -> Option<Frame> {
        self.frames.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.values().map(FrameOps::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.values().all(FrameOps::is_empty)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
